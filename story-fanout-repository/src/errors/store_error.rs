//! Store error types.
//!
//! This module defines the unified error type returned by every store trait,
//! for both the PostgreSQL backend and the in-memory backend.

use thiserror::Error;

/// Unified errors from store operations.
///
/// Callers only need to distinguish transient failures (worth retrying, see
/// [`StoreError::is_transient`]) from everything else.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The request was malformed (empty ids, bad cursor, oversized batch).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The store could not be reached. Safe to retry.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The store call did not complete in time. Safe to retry.
    #[error("Store call timed out after {0} ms")]
    Timeout(u64),

    /// A referenced record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The write conflicts with the current record state.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The backend rejected the operation.
    #[error("Database error: {0}")]
    Database(String),

    /// A stored value could not be decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Create an invalid input error.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create an unavailable error.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create a not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a conflict error.
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create a database error.
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a serialization error.
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => Self::Unavailable(err.to_string()),
            sqlx::Error::RowNotFound => Self::NotFound(err.to_string()),
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Self::Serialization(err.to_string())
            }
            _ => Self::Database(err.to_string()),
        }
    }
}

impl From<story_fanout_shared::ParseJobStatusError> for StoreError {
    fn from(err: story_fanout_shared::ParseJobStatusError) -> Self {
        Self::Serialization(err.to_string())
    }
}
