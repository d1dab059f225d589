#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Action classification and permission gating for tool calls.
//!
//! Every tool call is classified into an [`ActionCategory`] by a
//! table-driven classifier with bespoke rules for the built-in tools.
//! Read-only categories pass immediately; everything else consults an
//! injected asynchronous [`Approver`].

mod action;
mod approver;
mod manager;
mod request;

pub use action::{ActionCategory, classify_http_method, classify_shell_command};
pub use approver::{Approver, AutoApprover, CallbackApprover, DenyAllApprover, SharedApprover};
pub use manager::PermissionManager;
pub use request::PermissionRequest;
