pub mod models;
pub mod pii;

/// Trip identifiers are sequential integers assigned by the store.
pub type TripId = i64;
/// Delivery request identifiers are sequential integers assigned by the store.
pub type DeliveryRequestId = i64;
