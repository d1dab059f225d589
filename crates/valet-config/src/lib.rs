#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Environment-driven configuration for the valet assistant runtime.
//!
//! All options are read from `VALET_*` environment variables, except API
//! keys which use their provider-conventional names (`ANTHROPIC_API_KEY`,
//! `OPENAI_API_KEY`). Parse failures never abort startup: the offending
//! variable falls back to its default with a logged warning.

mod settings;

pub use settings::Settings;
