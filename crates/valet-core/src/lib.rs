#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Shared types for the valet assistant runtime.
//!
//! Small crate: identifiers and timestamps used across the workspace.
//! Business logic lives in the leaf crates.

mod types;

pub use types::{SessionId, Timestamp, short_hex_id};
