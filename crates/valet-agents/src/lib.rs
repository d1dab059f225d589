#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Agent definitions, scoped runner, and multi-agent orchestration.
//!
//! An agent is a named, declarative configuration of a conversational role
//! with a scoped tool subset. The [`Orchestrator`] exposes delegation as
//! tools to the main conversation; delegated runs are isolated
//! conversations driven by the [`AgentRunner`] through the same router and
//! registry. Fire-and-forget delegations live in the bounded
//! [`BackgroundTaskManager`] and deliver their results through a
//! task-local callback.

mod background;
mod loader;
mod orchestrator;
mod runner;
mod types;

pub use background::{
    BackgroundTask, BackgroundTaskManager, DeliveryCallback, TaskStatus, current_delivery,
    with_delivery,
};
pub use loader::AgentLoader;
pub use orchestrator::{Delegation, Orchestrator};
pub use runner::AgentRunner;
pub use types::{AgentDefinition, AgentResult, ToolCallRecord};
