//! Backend error types.

use thiserror::Error;

/// Errors reported by a backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HalError {
    /// The backend does not implement the requested operation.
    #[error("Unsupported operation '{0}'")]
    UnsupportedOperation(String),

    /// The request was rejected before running.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A failure that may succeed on another attempt.
    #[error("Transient backend failure: {0}")]
    Transient(String),

    /// The backend is not reachable or not ready.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// A failure that will not go away on retry.
    #[error("Backend failure: {0}")]
    Fatal(String),

    /// The run was stopped by a cancellation request.
    #[error("Run cancelled")]
    Cancelled,
}

impl HalError {
    /// Whether a retry of the same request might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, HalError::Transient(_) | HalError::Unavailable(_))
    }
}

/// Result type for backend calls.
pub type HalResult<T> = Result<T, HalError>;
