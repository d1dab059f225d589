//! Scheduler manager: durable jobs on in-process tokio timers.

use async_trait::async_trait;
use chrono::Utc;
use chrono_tz::Tz;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use valet_core::short_hex_id;
use valet_notify::NotificationDispatcher;

use crate::error::SchedulerResult;
use crate::store::{JobRecord, JobStore};
use crate::trigger::Trigger;
use crate::workflow::{WorkflowManager, WorkflowRunner};

/// Job action kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobType {
    /// Send a fixed notification message.
    Notification,
    /// Run a prompt through the assistant and dispatch the response.
    Assistant,
    /// Run a named workflow and dispatch a step summary.
    Workflow,
}

impl JobType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Notification => "notification",
            Self::Assistant => "assistant",
            Self::Workflow => "workflow",
        }
    }
}

/// The assistant entry point used by `assistant` jobs.
///
/// Implemented by the chat service; scheduled prompts run in the
/// well-known `"scheduler"` session.
#[async_trait]
pub trait AssistantJob: Send + Sync {
    /// Run a prompt and return the response text (errors surface as text).
    async fn get_response(&self, session_id: &str, prompt: &str) -> String;
}

/// Manages scheduled jobs with SQLite persistence and tokio timers.
///
/// Jobs are persisted before registration; `start` replays everything in
/// the store. Each registered job runs on its own timer task.
pub struct SchedulerManager {
    store: JobStore,
    dispatcher: Arc<NotificationDispatcher>,
    assistant: Option<Arc<dyn AssistantJob>>,
    workflows: Option<(Arc<WorkflowManager>, Arc<WorkflowRunner>)>,
    timezone: Tz,
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl SchedulerManager {
    /// Create a manager. An unknown timezone name falls back to UTC.
    #[must_use]
    pub fn new(store: JobStore, dispatcher: Arc<NotificationDispatcher>, timezone: &str) -> Self {
        let tz: Tz = timezone.parse().unwrap_or_else(|_| {
            warn!(timezone, "unknown timezone, using UTC");
            Tz::UTC
        });
        Self {
            store,
            dispatcher,
            assistant: None,
            workflows: None,
            timezone: tz,
            timers: Mutex::new(HashMap::new()),
        }
    }

    /// Wire the assistant entry point (enables `assistant` jobs).
    #[must_use]
    pub fn with_assistant(mut self, assistant: Arc<dyn AssistantJob>) -> Self {
        self.assistant = Some(assistant);
        self
    }

    /// Wire the workflow system (enables `workflow` jobs).
    #[must_use]
    pub fn with_workflows(
        mut self,
        manager: Arc<WorkflowManager>,
        runner: Arc<WorkflowRunner>,
    ) -> Self {
        self.workflows = Some((manager, runner));
        self
    }

    /// Start the scheduler: register every persisted job with the timer.
    /// Jobs that fail to register are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn start(self: &Arc<Self>) -> SchedulerResult<()> {
        let jobs = self.store.load_all()?;
        for job in jobs {
            match self.register_job(&job) {
                Ok(()) => info!(job = %job.id, "loaded persisted job"),
                Err(e) => warn!(job = %job.id, error = %e, "failed to register job"),
            }
        }
        info!("scheduler started");
        Ok(())
    }

    /// Stop all timers.
    pub fn stop(&self) {
        let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        for (_, handle) in timers.drain() {
            handle.abort();
        }
        info!("scheduler stopped");
    }

    /// Register a job's timer task.
    fn register_job(self: &Arc<Self>, job: &JobRecord) -> SchedulerResult<()> {
        let trigger = Trigger::from_spec(&job.trigger_type, &job.trigger_args, self.timezone)?;

        let scheduler = Arc::clone(self);
        let record = job.clone();
        let handle = tokio::spawn(async move {
            let mut after = Utc::now();
            loop {
                let Some(next) = trigger.next_fire(after) else {
                    break;
                };
                let delay = (next - Utc::now())
                    .to_std()
                    .unwrap_or(std::time::Duration::ZERO);
                tokio::time::sleep(delay).await;

                scheduler.run_job(&record).await;

                if trigger.is_one_shot() {
                    break;
                }
                after = next.max(Utc::now());
            }
        });

        let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = timers.insert(job.id.clone(), handle) {
            previous.abort();
        }
        Ok(())
    }

    /// Execute one firing of a job. Failures are dispatched as
    /// notifications; the schedule itself continues.
    async fn run_job(&self, job: &JobRecord) {
        info!(job = %job.id, kind = %job.job_type, "running scheduled job");
        match job.job_type.as_str() {
            "notification" => {
                let message = job
                    .job_args
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or(&job.description);
                self.dispatcher
                    .send(&format!("Reminder: {message}"), false)
                    .await;
            },
            "assistant" => {
                let Some(assistant) = &self.assistant else {
                    warn!(job = %job.id, "assistant job without assistant wired");
                    return;
                };
                let session_id = job
                    .job_args
                    .get("session_id")
                    .and_then(Value::as_str)
                    .unwrap_or("scheduler");
                let prompt = job
                    .job_args
                    .get("prompt")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let response = assistant.get_response(session_id, prompt).await;
                self.dispatcher
                    .send(&format!("Scheduled task result:\n{response}"), false)
                    .await;
            },
            "workflow" => {
                let Some((manager, runner)) = &self.workflows else {
                    warn!(job = %job.id, "workflow job without workflow system wired");
                    return;
                };
                let name = job
                    .job_args
                    .get("workflow")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let Some(definition) = manager.get(name) else {
                    self.dispatcher
                        .send(&format!("Workflow not found: {name}"), false)
                        .await;
                    return;
                };
                let results = runner.run(&definition, None).await;
                let summary: Vec<String> = results
                    .iter()
                    .map(|r| format!("  {}: {}", r.step, r.status.as_str()))
                    .collect();
                self.dispatcher
                    .send(&format!(
                        "Workflow '{name}' completed:\n{}",
                        summary.join("\n")
                    ), false)
                    .await;
            },
            other => warn!(job = %job.id, kind = other, "unknown job type"),
        }
    }

    fn add_job(
        self: &Arc<Self>,
        prefix: &str,
        description: &str,
        trigger_type: &str,
        trigger_args: Value,
        job_type: JobType,
        job_args: Value,
    ) -> SchedulerResult<String> {
        let job = JobRecord {
            id: format!("{prefix}_{}", short_hex_id(8)),
            description: description.to_string(),
            trigger_type: trigger_type.to_string(),
            trigger_args,
            job_type: job_type.as_str().to_string(),
            job_args,
        };

        // Persist first, then register with the timer.
        self.store.save(&job)?;
        self.register_job(&job)?;

        info!(job = %job.id, description, "added job");
        Ok(job.id)
    }

    /// Add a notification reminder. Returns the job id.
    ///
    /// # Errors
    ///
    /// Returns an error if persistence fails or the trigger is invalid.
    pub fn add_reminder(
        self: &Arc<Self>,
        description: &str,
        trigger_type: &str,
        trigger_args: Value,
        message: Option<&str>,
    ) -> SchedulerResult<String> {
        let message = message.unwrap_or(description);
        self.add_job(
            "reminder",
            description,
            trigger_type,
            trigger_args,
            JobType::Notification,
            json!({"message": message}),
        )
    }

    /// Add a job that runs a prompt through the assistant.
    ///
    /// # Errors
    ///
    /// Returns an error if persistence fails or the trigger is invalid.
    pub fn add_assistant_job(
        self: &Arc<Self>,
        description: &str,
        trigger_type: &str,
        trigger_args: Value,
        prompt: &str,
        session_id: &str,
    ) -> SchedulerResult<String> {
        self.add_job(
            "assistant",
            description,
            trigger_type,
            trigger_args,
            JobType::Assistant,
            json!({"prompt": prompt, "session_id": session_id}),
        )
    }

    /// Add a job that runs a named workflow.
    ///
    /// # Errors
    ///
    /// Returns an error if persistence fails or the trigger is invalid.
    pub fn add_workflow_job(
        self: &Arc<Self>,
        description: &str,
        trigger_type: &str,
        trigger_args: Value,
        workflow_name: &str,
    ) -> SchedulerResult<String> {
        self.add_job(
            "workflow",
            description,
            trigger_type,
            trigger_args,
            JobType::Workflow,
            json!({"workflow": workflow_name}),
        )
    }

    /// Remove a job from the timer (tolerating absence — one-shots may have
    /// fired) and the store. Returns `true` if the stored job existed.
    pub fn remove_job(&self, job_id: &str) -> bool {
        if let Some(handle) = self
            .timers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(job_id)
        {
            handle.abort();
        }
        self.store.delete(job_id)
    }

    /// All persisted jobs.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn list_jobs(&self) -> SchedulerResult<Vec<JobRecord>> {
        self.store.load_all()
    }

    /// Remove expired one-shot jobs from the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn prune_expired(&self) -> SchedulerResult<usize> {
        self.store.prune_expired()
    }
}

impl std::fmt::Debug for SchedulerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerManager")
            .field("timezone", &self.timezone)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use valet_notify::NotificationSink;

    fn collecting_dispatcher() -> (Arc<NotificationDispatcher>, Arc<StdMutex<Vec<String>>>) {
        let dispatcher = Arc::new(NotificationDispatcher::disabled_dnd());
        let received = Arc::new(StdMutex::new(Vec::new()));
        (dispatcher, received)
    }

    async fn attach(dispatcher: &Arc<NotificationDispatcher>, log: &Arc<StdMutex<Vec<String>>>) {
        let sink_log = Arc::clone(log);
        let sink: NotificationSink = Arc::new(move |msg: String| {
            let sink_log = Arc::clone(&sink_log);
            Box::pin(async move {
                sink_log.lock().unwrap().push(msg);
            })
        });
        dispatcher.register(sink).await;
    }

    fn manager_with(dispatcher: Arc<NotificationDispatcher>) -> Arc<SchedulerManager> {
        Arc::new(SchedulerManager::new(
            JobStore::in_memory().unwrap(),
            dispatcher,
            "UTC",
        ))
    }

    #[tokio::test]
    async fn test_add_reminder_persists() {
        let (dispatcher, _log) = collecting_dispatcher();
        let scheduler = manager_with(dispatcher);

        let id = scheduler
            .add_reminder(
                "D",
                "date",
                json!({"run_date": "2099-01-01T09:00:00"}),
                Some("hi"),
            )
            .unwrap();
        assert!(id.starts_with("reminder_"));

        let jobs = scheduler.list_jobs().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].description, "D");
        assert_eq!(jobs[0].trigger_type, "date");
        assert_eq!(jobs[0].job_args["message"], "hi");
        scheduler.stop();
    }

    #[tokio::test]
    async fn test_persisted_jobs_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scheduler.db");
        let (dispatcher, _log) = collecting_dispatcher();

        {
            let scheduler = Arc::new(SchedulerManager::new(
                JobStore::open(&path).unwrap(),
                Arc::clone(&dispatcher),
                "UTC",
            ));
            scheduler
                .add_reminder(
                    "D",
                    "date",
                    json!({"run_date": "2099-01-01T09:00:00"}),
                    Some("hi"),
                )
                .unwrap();
            scheduler.stop();
        }

        // Fresh process: replay from the store.
        let scheduler = Arc::new(SchedulerManager::new(
            JobStore::open(&path).unwrap(),
            dispatcher,
            "UTC",
        ));
        scheduler.start().unwrap();

        let jobs = scheduler.list_jobs().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].description, "D");
        assert_eq!(jobs[0].trigger_args["run_date"], "2099-01-01T09:00:00");
        scheduler.stop();
    }

    #[tokio::test]
    async fn test_invalid_trigger_rejected() {
        let (dispatcher, _log) = collecting_dispatcher();
        let scheduler = manager_with(dispatcher);
        let result = scheduler.add_reminder("bad", "lunar", json!({}), None);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_interval_job_fires_and_repeats() {
        let (dispatcher, log) = collecting_dispatcher();
        attach(&dispatcher, &log).await;
        let scheduler = manager_with(dispatcher);

        scheduler
            .add_reminder(
                "tick",
                "interval",
                json!({"seconds": 0.05}),
                Some("tick"),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(180)).await;
        scheduler.stop();

        let messages = log.lock().unwrap();
        assert!(messages.len() >= 2, "fired {} times", messages.len());
        assert!(messages[0].starts_with("Reminder: tick"));
    }

    #[tokio::test]
    async fn test_remove_job_stops_and_deletes() {
        let (dispatcher, log) = collecting_dispatcher();
        attach(&dispatcher, &log).await;
        let scheduler = manager_with(dispatcher);

        let id = scheduler
            .add_reminder("tick", "interval", json!({"seconds": 0.05}), None)
            .unwrap();
        assert!(scheduler.remove_job(&id));
        assert!(!scheduler.remove_job(&id), "already gone");

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(log.lock().unwrap().is_empty(), "timer cancelled");
        assert!(scheduler.list_jobs().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_assistant_job_dispatches_response() {
        struct CannedAssistant;

        #[async_trait]
        impl AssistantJob for CannedAssistant {
            async fn get_response(&self, session_id: &str, prompt: &str) -> String {
                format!("[{session_id}] answered: {prompt}")
            }
        }

        let (dispatcher, log) = collecting_dispatcher();
        attach(&dispatcher, &log).await;
        let scheduler = Arc::new(
            SchedulerManager::new(JobStore::in_memory().unwrap(), dispatcher, "UTC")
                .with_assistant(Arc::new(CannedAssistant)),
        );

        scheduler
            .add_assistant_job(
                "morning brief",
                "interval",
                json!({"seconds": 0.05}),
                "what's on today?",
                "scheduler",
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;
        scheduler.stop();

        let messages = log.lock().unwrap();
        assert!(!messages.is_empty());
        assert!(
            messages[0].starts_with("Scheduled task result:\n[scheduler] answered: what's on today?"),
            "got: {}",
            messages[0]
        );
    }

    #[tokio::test]
    async fn test_workflow_job_runs_and_summarises() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("greet.yaml"),
            "name: greet\nsteps:\n  - name: hello\n    tool: t1\n",
        )
        .unwrap();
        let wf_manager = Arc::new(WorkflowManager::new(dir.path()));
        wf_manager.load();
        let wf_runner = Arc::new(WorkflowRunner::new());

        let (dispatcher, log) = collecting_dispatcher();
        attach(&dispatcher, &log).await;
        let scheduler = Arc::new(
            SchedulerManager::new(JobStore::in_memory().unwrap(), dispatcher, "UTC")
                .with_workflows(wf_manager, wf_runner),
        );

        scheduler
            .add_workflow_job("daily greet", "interval", json!({"seconds": 0.05}), "greet")
            .unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;
        scheduler.stop();

        let messages = log.lock().unwrap();
        assert!(!messages.is_empty());
        assert!(messages[0].contains("Workflow 'greet' completed"));
        assert!(messages[0].contains("hello: success"));
    }

    #[tokio::test]
    async fn test_unknown_workflow_notifies() {
        let dir = tempfile::tempdir().unwrap();
        let wf_manager = Arc::new(WorkflowManager::new(dir.path()));
        wf_manager.load();

        let (dispatcher, log) = collecting_dispatcher();
        attach(&dispatcher, &log).await;
        let scheduler = Arc::new(
            SchedulerManager::new(JobStore::in_memory().unwrap(), dispatcher, "UTC")
                .with_workflows(wf_manager, Arc::new(WorkflowRunner::new())),
        );

        scheduler
            .add_workflow_job("ghost", "interval", json!({"seconds": 0.05}), "ghost")
            .unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        scheduler.stop();

        assert!(log.lock().unwrap()[0].contains("Workflow not found: ghost"));
    }
}
