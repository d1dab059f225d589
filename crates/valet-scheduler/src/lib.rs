#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Durable job scheduling and declarative workflows.
//!
//! Jobs (date, cron, interval triggers) are persisted to SQLite before
//! registration with in-process tokio timers, and replayed on startup.
//! Workflows are ordered tool-invocation chains loaded from YAML; their
//! steps funnel through the tool registry, so permission gating and audit
//! apply unchanged.

mod error;
mod manager;
mod store;
mod tool;
mod trigger;
mod workflow;

pub use error::{SchedulerError, SchedulerResult};
pub use manager::{AssistantJob, JobType, SchedulerManager};
pub use store::{JobRecord, JobStore};
pub use tool::register_schedule_reminder_tool;
pub use trigger::Trigger;
pub use workflow::{
    StepResult, StepStatus, WorkflowApprovalCallback, WorkflowDefinition, WorkflowManager,
    WorkflowRunner, WorkflowStep, WorkflowToolExecutor,
};
