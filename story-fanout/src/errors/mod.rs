//! Error types for story fan-out.

use story_fanout_repository::StoreError;
use story_fanout_shared::JobId;
use thiserror::Error;

/// Errors surfaced by the fan-out engine and service.
///
/// Transient store failures never reach callers per batch: they are retried
/// and only surface as [`FanoutError::RetriesExhausted`].
#[derive(Error, Debug, Clone)]
pub enum FanoutError {
    /// Malformed identifiers, bad counts or an illegal job transition.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A store was unreachable on a call that is not retried.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A store call kept failing transiently until the attempt budget ran out.
    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        operation: &'static str,
        attempts: u32,
        last_error: String,
    },

    /// No job with this id exists.
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    /// The job stopped between batches because it was cancelled.
    #[error("Job {0} was cancelled")]
    Cancelled(JobId),

    /// The service no longer accepts work.
    #[error("Service is shutting down")]
    ShuttingDown,

    /// A non-transient store failure.
    #[error("Store error: {0}")]
    Store(StoreError),
}

impl FanoutError {
    /// Create an invalid input error.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}

impl From<StoreError> for FanoutError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidInput(msg) | StoreError::Conflict(msg) => Self::InvalidInput(msg),
            StoreError::Unavailable(_) | StoreError::Timeout(_) => {
                Self::StoreUnavailable(err.to_string())
            }
            other => Self::Store(other),
        }
    }
}
