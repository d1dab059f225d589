#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Tool registry chokepoint for the valet assistant runtime.
//!
//! Every tool call — from the main conversation, a delegated agent, or a
//! workflow step — funnels through [`ToolRegistry::execute`], which is the
//! single place where permission checking, input sanitisation, and audit
//! logging happen.

mod registry;
mod sanitize;

pub use registry::{ToolHandler, ToolRegistry};
pub use sanitize::{sanitize_path, sanitize_tool_input, strip_injection_patterns};
