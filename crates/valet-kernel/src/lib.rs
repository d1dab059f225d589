#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Daemon for the valet assistant runtime.
//!
//! Owns the per-transport session store, the chat service (the core side of
//! the transport adapter contract), and the inbound HTTP surface (health
//! endpoint and token-verified webhook triggers into workflows).

pub mod chat;
pub mod server;
pub mod session;
pub mod webhooks;

pub use chat::ChatService;
pub use session::{Session, SessionManager};
pub use webhooks::WebhookState;
