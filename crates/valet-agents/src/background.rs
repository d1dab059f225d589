//! Background task records and the task-local carriers.
//!
//! The delegation depth and the per-request delivery callback are carried
//! in tokio task-locals rather than shared fields, so concurrent top-level
//! requests never observe each other's state.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;

use valet_core::{Timestamp, short_hex_id};

/// Default capacity of the background task map.
const DEFAULT_CAPACITY: usize = 50;

/// Channel-specific callback that receives background completion notices.
pub type DeliveryCallback = Arc<dyn Fn(String) -> BoxFuture<'static, ()> + Send + Sync>;

tokio::task_local! {
    /// Delegation depth of the current task chain.
    pub(crate) static DELEGATION_DEPTH: usize;

    /// Delivery callback of the originating transport, if any.
    static CURRENT_DELIVERY: Option<DeliveryCallback>;
}

/// Read the delivery callback carried by the current task, if any.
#[must_use]
pub fn current_delivery() -> Option<DeliveryCallback> {
    CURRENT_DELIVERY
        .try_with(std::clone::Clone::clone)
        .ok()
        .flatten()
}

/// Run a future with a delivery callback installed in its task scope.
pub async fn with_delivery<F: Future>(callback: Option<DeliveryCallback>, fut: F) -> F::Output {
    CURRENT_DELIVERY.scope(callback, fut).await
}

/// Read the delegation depth of the current task chain (0 at top level).
#[must_use]
pub(crate) fn current_depth() -> usize {
    DELEGATION_DEPTH.try_with(|d| *d).unwrap_or(0)
}

/// Status of a background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Created, not yet started.
    Pending,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Done,
    /// Finished with an error.
    Error,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Done => "done",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// A detached agent run and its (eventual) result.
#[derive(Clone)]
pub struct BackgroundTask {
    /// Task id, 8 hex chars.
    pub id: String,
    /// The agent running the task.
    pub agent_name: String,
    /// What the task is doing.
    pub task_description: String,
    /// Current status.
    pub status: TaskStatus,
    /// Creation time.
    pub created_at: Timestamp,
    /// Completion time, once terminal.
    pub finished_at: Option<Timestamp>,
    /// Result text (Done).
    pub result: String,
    /// Error message (Error).
    pub error: String,
    /// Where to deliver the completion notice.
    pub deliver: Option<DeliveryCallback>,
}

impl fmt::Debug for BackgroundTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundTask")
            .field("id", &self.id)
            .field("agent_name", &self.agent_name)
            .field("status", &self.status)
            .field("has_deliver", &self.deliver.is_some())
            .finish_non_exhaustive()
    }
}

struct Inner {
    tasks: HashMap<String, BackgroundTask>,
    order: VecDeque<String>,
    capacity: usize,
}

/// In-memory manager for background agent tasks with bounded FIFO eviction.
///
/// All map operations happen under one lock, so the size bound holds under
/// concurrent access.
pub struct BackgroundTaskManager {
    inner: Mutex<Inner>,
}

impl BackgroundTaskManager {
    /// Create a manager with the default capacity (50).
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a manager with an explicit capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                tasks: HashMap::new(),
                order: VecDeque::new(),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Create a new pending task with a fresh 8-hex id, evicting the oldest
    /// entry at capacity.
    pub fn create(
        &self,
        agent_name: &str,
        task_description: &str,
        deliver: Option<DeliveryCallback>,
    ) -> BackgroundTask {
        let task = BackgroundTask {
            id: short_hex_id(8),
            agent_name: agent_name.to_string(),
            task_description: task_description.to_string(),
            status: TaskStatus::Pending,
            created_at: Timestamp::now(),
            finished_at: None,
            result: String::new(),
            error: String::new(),
            deliver,
        };

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.order.len() >= inner.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.tasks.remove(&evicted);
            }
        }
        inner.order.push_back(task.id.clone());
        inner.tasks.insert(task.id.clone(), task.clone());
        task
    }

    /// Get a task snapshot. `None` for unknown or evicted ids.
    pub fn get(&self, task_id: &str) -> Option<BackgroundTask> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .tasks
            .get(task_id)
            .cloned()
    }

    /// All resident tasks in creation order.
    pub fn list(&self) -> Vec<BackgroundTask> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .order
            .iter()
            .filter_map(|id| inner.tasks.get(id))
            .cloned()
            .collect()
    }

    /// Mark a task running.
    pub fn mark_running(&self, task_id: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = inner.tasks.get_mut(task_id) {
            task.status = TaskStatus::Running;
        }
    }

    /// Mark a task done; returns its delivery callback.
    pub fn mark_done(&self, task_id: &str, result: &str) -> Option<DeliveryCallback> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.tasks.get_mut(task_id).and_then(|task| {
            task.status = TaskStatus::Done;
            task.result = result.to_string();
            task.finished_at = Some(Timestamp::now());
            task.deliver.clone()
        })
    }

    /// Mark a task failed; returns its delivery callback.
    pub fn mark_error(&self, task_id: &str, error: &str) -> Option<DeliveryCallback> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.tasks.get_mut(task_id).and_then(|task| {
            task.status = TaskStatus::Error;
            task.error = error.to_string();
            task.finished_at = Some(Timestamp::now());
            task.deliver.clone()
        })
    }

    /// Number of resident tasks.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).order.len()
    }

    /// Whether no tasks are resident.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for BackgroundTaskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BackgroundTaskManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundTaskManager")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_assigns_8_hex_id() {
        let manager = BackgroundTaskManager::new();
        let task = manager.create("echo", "say hi", None);
        assert_eq!(task.id.len(), 8);
        assert!(task.id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn test_bounded_eviction_keeps_most_recent() {
        let manager = BackgroundTaskManager::with_capacity(3);
        let ids: Vec<String> = (0..5)
            .map(|i| manager.create("a", &format!("task {i}"), None).id)
            .collect();

        assert_eq!(manager.len(), 3);
        // The two oldest are gone.
        assert!(manager.get(&ids[0]).is_none());
        assert!(manager.get(&ids[1]).is_none());
        // The three newest remain, in creation order.
        let resident: Vec<String> = manager.list().into_iter().map(|t| t.id).collect();
        assert_eq!(resident, &ids[2..]);
    }

    #[test]
    fn test_status_transitions() {
        let manager = BackgroundTaskManager::new();
        let task = manager.create("echo", "work", None);

        manager.mark_running(&task.id);
        assert_eq!(manager.get(&task.id).unwrap().status, TaskStatus::Running);

        manager.mark_done(&task.id, "all good");
        let done = manager.get(&task.id).unwrap();
        assert_eq!(done.status, TaskStatus::Done);
        assert_eq!(done.result, "all good");
        assert!(done.finished_at.is_some());
    }

    #[test]
    fn test_mark_error_records_message() {
        let manager = BackgroundTaskManager::new();
        let task = manager.create("echo", "work", None);
        manager.mark_error(&task.id, "agent not found");
        let failed = manager.get(&task.id).unwrap();
        assert_eq!(failed.status, TaskStatus::Error);
        assert_eq!(failed.error, "agent not found");
    }

    #[tokio::test]
    async fn test_delivery_carrier_is_task_local() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let hits = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&hits);
        let callback: DeliveryCallback = Arc::new(move |_msg: String| {
            let counted = Arc::clone(&counted);
            Box::pin(async move {
                counted.fetch_add(1, Ordering::SeqCst);
            })
        });

        // Inside the scope the callback is visible.
        with_delivery(Some(callback), async {
            let cb = current_delivery().expect("callback in scope");
            cb("done".to_string()).await;
        })
        .await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Outside (and in sibling tasks) it is not.
        assert!(current_delivery().is_none());
        let sibling = tokio::spawn(async { current_delivery().is_none() });
        assert!(sibling.await.unwrap());
    }

    #[tokio::test]
    async fn test_depth_carrier_isolated_per_task() {
        assert_eq!(current_depth(), 0);

        DELEGATION_DEPTH
            .scope(2, async {
                assert_eq!(current_depth(), 2);
                // A spawned task does not inherit the scope.
                let spawned = tokio::spawn(async { current_depth() });
                assert_eq!(spawned.await.unwrap(), 0);
            })
            .await;

        assert_eq!(current_depth(), 0);
    }
}
