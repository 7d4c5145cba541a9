//! Error type for the service facade.

use ddmsync_core::StatusParseError;
use ddmsync_storage::StorageError;
use thiserror::Error;

/// Result type for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors surfaced to callers of the service facade.
///
/// Notification failures are deliberately absent: a change that was
/// persisted stays persisted, and a failed fan-out is logged rather
/// than reported as an operation failure.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The storage layer failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A status report could not be parsed.
    #[error("parsing status report: {0}")]
    StatusParse(#[from] StatusParseError),

    /// The caller supplied malformed input.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl ServiceError {
    /// Creates an invalid-input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Returns `true` for conditions an API layer maps to 404.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Storage(e) if e.is_not_found())
    }
}
