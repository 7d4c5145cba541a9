//! Error types for protocol parsing and validation.

use thiserror::Error;

/// Errors produced while parsing or validating a declaration.
#[derive(Debug, Error)]
pub enum DeclarationError {
    /// The raw bytes were not valid JSON.
    #[error("invalid declaration JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The declaration identifier is empty.
    #[error("declaration identifier is empty")]
    EmptyIdentifier,

    /// The declaration type is empty.
    #[error("declaration type is empty")]
    EmptyType,

    /// The payload is not a JSON object.
    #[error("declaration payload is not a JSON object")]
    PayloadNotObject,

    /// A declaration check-in path did not split into type and identifier.
    #[error("invalid declaration path: {0}")]
    InvalidPath(String),
}

/// Errors produced while parsing a client status report.
#[derive(Debug, Error)]
pub enum StatusParseError {
    /// The top-level report was not valid JSON.
    #[error("invalid status JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A special-cased subtree had an unexpected shape.
    ///
    /// Partial ingestion would corrupt reconciliation, so a surprising
    /// shape fails the whole parse instead of dropping the subtree.
    #[error("unexpected shape at {path}: expected {expected}")]
    UnexpectedShape {
        /// Dotted path of the offending subtree.
        path: String,
        /// What the parser expected to find there.
        expected: &'static str,
    },
}

impl StatusParseError {
    /// Creates an unexpected-shape error.
    pub fn unexpected(path: impl Into<String>, expected: &'static str) -> Self {
        Self::UnexpectedShape {
            path: path.into(),
            expected,
        }
    }
}
