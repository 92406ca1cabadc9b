/// Error position used by every store trait, matching the boxed-error
/// convention of the repository layer.
pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

pub type StoreResult<T> = Result<T, StoreError>;

/// Returned by a versioned save when the record changed since it was read.
/// Engines downcast for this to drive their retry loops.
#[derive(Debug, thiserror::Error)]
#[error("stale version: record was modified concurrently")]
pub struct VersionConflict;
