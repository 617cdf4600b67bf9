//! Store-level error taxonomy.
//!
//! Business rejections (capacity exhausted, scan limit reached) are never errors;
//! they are variants of the outcome enums returned by the store. A [`StoreError`]
//! means the primitive itself could not execute and nothing was written.

use thiserror::Error;

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while talking to the durable store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached or the statement did not complete.
    ///
    /// Fatal to the single operation. The caller retries with backoff; every
    /// engine operation is safe to retry.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A concurrent writer won a race the store could not resolve in place
    /// (unique violation, serialization failure, deadlock).
    #[error("Store conflict: {0}")]
    Conflict(String),

    /// Persisted data does not decode into a valid domain value.
    #[error("Corrupt store data: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Whether retrying the same operation may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Conflict(_))
    }
}
