//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
///
/// Not-found conditions are distinct variants so API callers can map
/// them to 404s; everything else is either caller error
/// (`InvalidInput`, `DeclarationInUse`) or an engine failure, which
/// is always propagated and never retried here.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The declaration does not exist.
    #[error("declaration not found: {0}")]
    DeclarationNotFound(String),

    /// No status report exists at the given index for the enrollment.
    #[error("status report not found: enrollment {enrollment_id}, index {index}")]
    StatusReportNotFound {
        /// The enrollment queried.
        enrollment_id: String,
        /// The report index queried.
        index: usize,
    },

    /// The caller supplied malformed or incomplete input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Deletion refused: the declaration is still a member of sets.
    #[error("declaration {identifier} is referenced by {set_count} set(s)")]
    DeclarationInUse {
        /// The declaration that could not be deleted.
        identifier: String,
        /// How many sets still reference it.
        set_count: usize,
    },

    /// The declaration failed validation.
    #[error(transparent)]
    Declaration(#[from] ddmsync_core::DeclarationError),

    /// An I/O error from the underlying engine.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A serialization error from the underlying engine.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    /// Creates an invalid-input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Creates a referential-conflict error.
    pub fn declaration_in_use(identifier: impl Into<String>, set_count: usize) -> Self {
        Self::DeclarationInUse {
            identifier: identifier.into(),
            set_count,
        }
    }

    /// Returns `true` for the not-found variants.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::DeclarationNotFound(_) | Self::StatusReportNotFound { .. }
        )
    }
}
