pub mod clock;
pub mod repository;
pub mod users;

use crate::repository::{StoreError, VersionConflict};

/// Failure taxonomy shared by every engine operation. Business-rule
/// violations are values of this enum; only `Store` represents an
/// infrastructure fault.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Unauthorized(String),

    #[error("email address has not been confirmed")]
    EmailNotConfirmed,

    #[error("account has not passed verification")]
    NotVerified,

    #[error("drivers cannot book seats on their own trip")]
    OwnTripBooking,

    #[error("{0}")]
    InvalidState(String),

    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("{0}")]
    Validation(String),

    #[error("not enough free seats: requested {requested}, available {available}")]
    InsufficientSeats { requested: u32, available: u32 },

    #[error("trip gender preference does not match this account")]
    GenderPreferenceMismatch,

    #[error("an active booking for this trip already exists")]
    AlreadyBooked,

    #[error("booking is already cancelled")]
    AlreadyCancelled,

    #[error("delivery window has expired")]
    Expired,

    #[error("request is attached to a different trip")]
    MismatchedTrip,

    #[error("record was modified concurrently, retry")]
    Conflict,

    #[error("store failure: {0}")]
    Store(String),
}

impl EngineError {
    /// Collapse a store-layer failure into the taxonomy. Stale-version
    /// failures become `Conflict` so callers can rerun their
    /// read-validate-write loop.
    pub fn from_store(err: StoreError) -> Self {
        if err.downcast_ref::<VersionConflict>().is_some() {
            EngineError::Conflict
        } else {
            EngineError::Store(err.to_string())
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        EngineError::InvalidState(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        EngineError::Unauthorized(msg.into())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_conflict_maps_to_conflict() {
        let err: StoreError = Box::new(VersionConflict);
        assert!(matches!(EngineError::from_store(err), EngineError::Conflict));
    }

    #[test]
    fn test_other_store_errors_map_to_store() {
        let err: StoreError = "connection refused".into();
        match EngineError::from_store(err) {
            EngineError::Store(msg) => assert!(msg.contains("connection refused")),
            other => panic!("unexpected mapping: {other:?}"),
        }
    }
}
