#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Append-only JSONL audit trail.
//!
//! Every security-relevant tool operation is recorded as one JSON object
//! per line. All user-visible values pass through a single sanitisation
//! helper (ANSI stripping, length truncation) before they reach disk.

mod entry;
mod error;
mod log;
mod sanitize;

pub use entry::AuditEntry;
pub use error::{AuditError, AuditResult};
pub use log::AuditLog;
pub use sanitize::{sanitize_string, sanitize_value};
