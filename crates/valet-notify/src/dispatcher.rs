//! Notification dispatcher with pluggable sinks and DND support.

use chrono::{Local, NaiveTime, Timelike};
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::error::{NotifyError, NotifyResult};

/// An async callback that delivers one message to a transport.
pub type NotificationSink = Arc<dyn Fn(String) -> BoxFuture<'static, ()> + Send + Sync>;

/// Parse an `HH:MM` string.
///
/// # Errors
///
/// Returns [`NotifyError::InvalidTime`] on malformed input.
pub fn parse_dnd_time(s: &str) -> NotifyResult<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|_| NotifyError::InvalidTime(s.to_string()))
}

/// Render a time back to canonical `HH:MM`.
#[must_use]
pub fn format_dnd_time(t: NaiveTime) -> String {
    format!("{:02}:{:02}", t.hour(), t.minute())
}

/// Check if `now` falls within the DND window.
///
/// Windows that cross midnight (start > end) invert the comparison.
#[must_use]
pub fn in_dnd_window(now: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start <= end {
        start <= now && now < end
    } else {
        now >= start || now < end
    }
}

struct DispatcherState {
    sinks: Vec<NotificationSink>,
    queued: Vec<String>,
}

/// Dispatches messages to registered notification sinks.
///
/// Sinks are async callables receiving a message string; the scheduler,
/// workflow engine, file monitor, and background tasks all publish through
/// here. `send` and `flush_queue` are critical sections with respect to one
/// another.
pub struct NotificationDispatcher {
    state: Mutex<DispatcherState>,
    dnd_enabled: bool,
    dnd_start: NaiveTime,
    dnd_end: NaiveTime,
    allow_urgent: bool,
}

impl NotificationDispatcher {
    /// Create a dispatcher. Malformed DND times fall back to the 23:00-07:00
    /// default with a warning.
    #[must_use]
    pub fn new(dnd_enabled: bool, dnd_start: &str, dnd_end: &str, allow_urgent: bool) -> Self {
        let start = parse_dnd_time(dnd_start).unwrap_or_else(|e| {
            warn!(error = %e, "bad DND start, using 23:00");
            NaiveTime::from_hms_opt(23, 0, 0).expect("valid time")
        });
        let end = parse_dnd_time(dnd_end).unwrap_or_else(|e| {
            warn!(error = %e, "bad DND end, using 07:00");
            NaiveTime::from_hms_opt(7, 0, 0).expect("valid time")
        });
        Self {
            state: Mutex::new(DispatcherState {
                sinks: Vec::new(),
                queued: Vec::new(),
            }),
            dnd_enabled,
            dnd_start: start,
            dnd_end: end,
            allow_urgent,
        }
    }

    /// A dispatcher with DND disabled.
    #[must_use]
    pub fn disabled_dnd() -> Self {
        Self::new(false, "23:00", "07:00", true)
    }

    /// Register a sink.
    pub async fn register(&self, sink: NotificationSink) {
        self.state.lock().await.sinks.push(sink);
    }

    /// Remove a previously registered sink (by identity).
    pub async fn unregister(&self, sink: &NotificationSink) {
        self.state
            .lock()
            .await
            .sinks
            .retain(|s| !Arc::ptr_eq(s, sink));
    }

    /// Number of registered sinks.
    pub async fn sink_count(&self) -> usize {
        self.state.lock().await.sinks.len()
    }

    /// Number of messages queued by DND.
    pub async fn queued_count(&self) -> usize {
        self.state.lock().await.queued.len()
    }

    fn is_dnd(&self) -> bool {
        if !self.dnd_enabled {
            return false;
        }
        in_dnd_window(Local::now().time(), self.dnd_start, self.dnd_end)
    }

    /// Send a message to all registered sinks.
    ///
    /// If DND is active and the message is not urgent (or urgent bypass is
    /// off), the message is queued instead. Otherwise any queued messages
    /// are flushed first, in order, and per-sink failures are isolated.
    pub async fn send(&self, message: &str, urgent: bool) {
        let mut state = self.state.lock().await;

        if self.is_dnd() && !(urgent && self.allow_urgent) {
            debug!(preview = %truncate(message, 80), "message queued (DND active)");
            state.queued.push(message.to_string());
            return;
        }

        let mut to_send = std::mem::take(&mut state.queued);
        to_send.push(message.to_string());

        for msg in &to_send {
            deliver(&state.sinks, msg).await;
        }
    }

    /// Flush queued messages regardless of DND state. Returns the number of
    /// messages sent. Idempotent: a second call with an empty queue sends
    /// nothing.
    pub async fn flush_queue(&self) -> usize {
        let mut state = self.state.lock().await;
        let queued = std::mem::take(&mut state.queued);
        let count = queued.len();

        for msg in &queued {
            deliver(&state.sinks, msg).await;
        }

        count
    }
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("dnd_enabled", &self.dnd_enabled)
            .field("dnd_start", &self.dnd_start)
            .field("dnd_end", &self.dnd_end)
            .field("allow_urgent", &self.allow_urgent)
            .finish_non_exhaustive()
    }
}

fn truncate(s: &str, max: usize) -> &str {
    let mut cut = max.min(s.len());
    while !s.is_char_boundary(cut) {
        cut = cut.saturating_sub(1);
    }
    &s[..cut]
}

/// Deliver one message to every sink, isolating per-sink failures so one
/// failing sink never prevents delivery to the others.
async fn deliver(sinks: &[NotificationSink], msg: &str) {
    for sink in sinks {
        let fut = std::panic::AssertUnwindSafe(sink(msg.to_string()));
        if futures::FutureExt::catch_unwind(fut).await.is_err() {
            error!("notification sink failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Mutex as StdMutex;

    fn collecting_sink() -> (NotificationSink, Arc<StdMutex<Vec<String>>>) {
        let received = Arc::new(StdMutex::new(Vec::new()));
        let log = Arc::clone(&received);
        let sink: NotificationSink = Arc::new(move |msg: String| {
            let log = Arc::clone(&log);
            Box::pin(async move {
                log.lock().unwrap().push(msg);
            })
        });
        (sink, received)
    }

    fn hhmm(t: NaiveTime) -> String {
        format_dnd_time(t)
    }

    #[test]
    fn test_parse_format_roundtrip() {
        for s in ["23:00", "07:30", "00:00"] {
            let t = parse_dnd_time(s).unwrap();
            assert_eq!(format_dnd_time(t), s);
        }
        assert!(parse_dnd_time("25:99").is_err());
        assert!(parse_dnd_time("nope").is_err());
    }

    #[test]
    fn test_dnd_window_normal() {
        let start = parse_dnd_time("09:00").unwrap();
        let end = parse_dnd_time("17:00").unwrap();
        assert!(in_dnd_window(parse_dnd_time("12:00").unwrap(), start, end));
        assert!(!in_dnd_window(parse_dnd_time("08:59").unwrap(), start, end));
        assert!(!in_dnd_window(parse_dnd_time("17:00").unwrap(), start, end));
    }

    #[test]
    fn test_dnd_window_crosses_midnight() {
        let start = parse_dnd_time("23:00").unwrap();
        let end = parse_dnd_time("07:00").unwrap();
        assert!(in_dnd_window(parse_dnd_time("23:30").unwrap(), start, end));
        assert!(in_dnd_window(parse_dnd_time("03:00").unwrap(), start, end));
        assert!(!in_dnd_window(parse_dnd_time("12:00").unwrap(), start, end));
    }

    #[tokio::test]
    async fn test_send_reaches_all_sinks() {
        let dispatcher = NotificationDispatcher::disabled_dnd();
        let (sink_a, log_a) = collecting_sink();
        let (sink_b, log_b) = collecting_sink();
        dispatcher.register(sink_a).await;
        dispatcher.register(sink_b).await;

        dispatcher.send("hello", false).await;

        assert_eq!(log_a.lock().unwrap().as_slice(), ["hello"]);
        assert_eq!(log_b.lock().unwrap().as_slice(), ["hello"]);
    }

    #[tokio::test]
    async fn test_dnd_queues_non_urgent() {
        // Window spanning "now" so DND is active.
        let now = Local::now().time();
        let start = hhmm(now - Duration::minutes(60));
        let end = hhmm(now + Duration::minutes(60));
        let dispatcher = NotificationDispatcher::new(true, &start, &end, true);
        let (sink, log) = collecting_sink();
        dispatcher.register(sink).await;

        dispatcher.send("later", false).await;
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(dispatcher.queued_count().await, 1);

        // Urgent bypasses and flushes the queue in order.
        dispatcher.send("now!", true).await;
        assert_eq!(log.lock().unwrap().as_slice(), ["later", "now!"]);
        assert_eq!(dispatcher.queued_count().await, 0);
    }

    #[tokio::test]
    async fn test_dnd_urgent_respects_allow_flag() {
        let now = Local::now().time();
        let start = hhmm(now - Duration::minutes(60));
        let end = hhmm(now + Duration::minutes(60));
        let dispatcher = NotificationDispatcher::new(true, &start, &end, false);
        let (sink, log) = collecting_sink();
        dispatcher.register(sink).await;

        dispatcher.send("urgent but blocked", true).await;
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(dispatcher.queued_count().await, 1);
    }

    #[tokio::test]
    async fn test_flush_queue_drains_and_is_idempotent() {
        let now = Local::now().time();
        let start = hhmm(now - Duration::minutes(60));
        let end = hhmm(now + Duration::minutes(60));
        let dispatcher = NotificationDispatcher::new(true, &start, &end, true);
        let (sink, log) = collecting_sink();
        dispatcher.register(sink).await;

        dispatcher.send("one", false).await;
        dispatcher.send("two", false).await;

        assert_eq!(dispatcher.flush_queue().await, 2);
        assert_eq!(log.lock().unwrap().as_slice(), ["one", "two"]);
        assert_eq!(dispatcher.flush_queue().await, 0);
    }

    #[tokio::test]
    async fn test_unregister_by_identity() {
        let dispatcher = NotificationDispatcher::disabled_dnd();
        let (sink_a, log_a) = collecting_sink();
        let (sink_b, log_b) = collecting_sink();
        dispatcher.register(Arc::clone(&sink_a)).await;
        dispatcher.register(sink_b).await;
        dispatcher.unregister(&sink_a).await;

        dispatcher.send("only b", false).await;
        assert!(log_a.lock().unwrap().is_empty());
        assert_eq!(log_b.lock().unwrap().as_slice(), ["only b"]);
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_block_others() {
        let dispatcher = NotificationDispatcher::disabled_dnd();
        let panicking: NotificationSink = Arc::new(|_msg: String| {
            Box::pin(async move {
                panic!("sink exploded");
            })
        });
        let (good, log) = collecting_sink();
        dispatcher.register(panicking).await;
        dispatcher.register(good).await;

        dispatcher.send("resilient", false).await;
        assert_eq!(log.lock().unwrap().as_slice(), ["resilient"]);
    }
}
