#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Notification fan-out and filesystem watching.
//!
//! The [`NotificationDispatcher`] delivers messages to registered sinks
//! (one per transport), queuing non-urgent messages during a configured
//! do-not-disturb window. The [`FileMonitor`] bridges debounced filesystem
//! events into the same dispatcher.

mod dispatcher;
mod error;
mod monitor;

pub use dispatcher::{
    NotificationDispatcher, NotificationSink, format_dnd_time, in_dnd_window, parse_dnd_time,
};
pub use error::{NotifyError, NotifyResult};
pub use monitor::FileMonitor;
