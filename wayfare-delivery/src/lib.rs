pub mod engine;
pub mod expiry;
pub mod matching;
pub mod models;
pub mod repository;

pub use engine::{DeliveryEngine, DeliveryRules};
pub use expiry::ExpirySweeper;
pub use matching::{locations_match, trip_accepts_request};
pub use models::{DeliveryDraft, DeliveryRequest, DeliveryStatus};
pub use repository::{DeliveryFilter, DeliveryRequestRepository, InMemoryDeliveryStore};
