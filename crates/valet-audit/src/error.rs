//! Audit-related error types.

use thiserror::Error;

/// Errors that can occur with audit operations.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Underlying I/O failure.
    #[error("audit I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Entry serialization failure.
    #[error("audit serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for audit operations.
pub type AuditResult<T> = Result<T, AuditError>;
