//! Notification error types.

use thiserror::Error;

/// Errors from the notification subsystem.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// A `HH:MM` time string failed to parse.
    #[error("invalid time '{0}', expected HH:MM")]
    InvalidTime(String),

    /// Filesystem watcher failure.
    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),
}

/// Result type for notification operations.
pub type NotifyResult<T> = Result<T, NotifyError>;
