//! Failure taxonomy for sync operations
//!
//! Every remote operation surfaces one of these variants. The split that
//! matters is retryable vs fatal: only transient transport failures
//! ([`SyncError::Unavailable`], [`SyncError::Timeout`]) are retried, and the
//! retry layer never downgrades a fatal error into another attempt.

use thiserror::Error;

/// Error types for sync operations
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SyncError {
    /// Input rejected locally, before any network call
    #[error("{0}")]
    Validation(String),

    /// Network unreachable or connection dropped mid-flight
    #[error("network unavailable: {0}")]
    Unavailable(String),

    /// Remote call did not complete in time
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// The remote store refused the operation for this user
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// No authenticated user for this session
    #[error("not authenticated")]
    NotAuthenticated,

    /// Document does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Anything we cannot classify (malformed documents, serialization)
    #[error("internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Whether the retry scheduler may attempt this operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Unavailable(_) | SyncError::Timeout(_))
    }

    /// Fatal errors end the operation immediately and trigger rollback
    /// of any optimistic state.
    pub fn is_fatal(&self) -> bool {
        !self.is_retryable()
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
