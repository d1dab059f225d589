//! Scheduler error types.

use thiserror::Error;

/// Errors from the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Job store failure.
    #[error("job store error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// I/O failure (store directory creation).
    #[error("scheduler I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization failure for trigger/job args.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A trigger specification could not be interpreted.
    #[error("invalid trigger: {0}")]
    InvalidTrigger(String),
}

/// Result type for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;
