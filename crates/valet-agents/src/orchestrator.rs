//! Orchestrator: delegation to sub-agents, exposed as tools.

use futures::FutureExt;
use serde::Deserialize;
use serde_json::{Value, json};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, info};

use valet_approval::{ActionCategory, AutoApprover, PermissionManager};
use valet_tools::{ToolHandler, ToolRegistry};

use crate::background::{
    BackgroundTaskManager, DELEGATION_DEPTH, TaskStatus, current_delivery, current_depth,
};
use crate::loader::AgentLoader;
use crate::runner::AgentRunner;
use crate::types::AgentResult;

/// Maximum delegation depth: the main conversation may delegate, and that
/// agent may delegate once more.
const MAX_DELEGATION_DEPTH: usize = 2;

/// Source of the base system prompt prepended to every agent run (identity,
/// durable memory).
pub type SystemPromptSource = Arc<dyn Fn() -> String + Send + Sync>;

/// One entry in a `delegate_parallel` request.
#[derive(Debug, Clone, Deserialize)]
pub struct Delegation {
    /// Target agent.
    pub agent_name: String,
    /// Task text.
    pub task: String,
    /// Optional extra context.
    #[serde(default)]
    pub context: String,
}

/// Orchestrates delegation to sub-agents and provides the delegation tools.
pub struct Orchestrator {
    loader: Arc<AgentLoader>,
    runner: Arc<AgentRunner>,
    background: Option<Arc<BackgroundTaskManager>>,
    base_prompt: Option<SystemPromptSource>,
}

impl Orchestrator {
    /// Create an orchestrator. Pass a background manager to enable
    /// fire-and-forget delegation and the `task_status` tool.
    #[must_use]
    pub fn new(
        loader: Arc<AgentLoader>,
        runner: Arc<AgentRunner>,
        background: Option<Arc<BackgroundTaskManager>>,
    ) -> Self {
        Self {
            loader,
            runner,
            background,
            base_prompt: None,
        }
    }

    /// Set the base system prompt source.
    #[must_use]
    pub fn with_base_prompt(mut self, source: SystemPromptSource) -> Self {
        self.base_prompt = Some(source);
        self
    }

    fn base_prompt(&self) -> String {
        self.base_prompt.as_ref().map(|f| f()).unwrap_or_default()
    }

    /// Delegate a task to a named agent and wait for the result.
    ///
    /// The delegation depth is carried in a task-local, so concurrent
    /// top-level requests (and parallel siblings) each track their own
    /// chain.
    pub async fn delegate(&self, agent_name: &str, task: &str, context: &str) -> AgentResult {
        let depth = current_depth();
        if depth >= MAX_DELEGATION_DEPTH {
            return AgentResult::failed(
                agent_name,
                format!(
                    "Maximum delegation depth ({MAX_DELEGATION_DEPTH}) exceeded. Cannot delegate further."
                ),
            );
        }

        let Some(agent) = self.loader.get(agent_name) else {
            return AgentResult::failed(agent_name, format!("Agent '{agent_name}' not found."));
        };

        info!(agent = agent_name, depth, "delegating task");
        let base_prompt = self.base_prompt();
        DELEGATION_DEPTH
            .scope(
                depth.saturating_add(1),
                self.runner.run(&agent, task, context, &base_prompt, None),
            )
            .await
    }

    /// Run multiple delegations concurrently, preserving input order in the
    /// results.
    pub async fn delegate_parallel(&self, delegations: &[Delegation]) -> Vec<AgentResult> {
        let futures = delegations
            .iter()
            .map(|d| self.delegate(&d.agent_name, &d.task, &d.context));
        futures::future::join_all(futures).await
    }

    /// Start a background delegation. Returns the new task id.
    ///
    /// The caller's delivery callback (task-local) is captured into the
    /// task record; the run itself is detached and auto-approved.
    fn spawn_background(
        self: &Arc<Self>,
        agent_name: &str,
        task: &str,
        context: &str,
    ) -> Option<String> {
        let manager = self.background.as_ref()?;
        let record = manager.create(agent_name, task, current_delivery());

        let orchestrator = Arc::clone(self);
        let task_id = record.id.clone();
        let agent_name = agent_name.to_string();
        let task = task.to_string();
        let context = context.to_string();
        tokio::spawn(async move {
            orchestrator
                .run_background(&task_id, &agent_name, &task, &context)
                .await;
        });

        Some(record.id)
    }

    async fn run_background(&self, task_id: &str, agent_name: &str, task: &str, context: &str) {
        let Some(manager) = self.background.as_ref() else {
            return;
        };
        manager.mark_running(task_id);

        let Some(agent) = self.loader.get(agent_name) else {
            let message = format!("Agent '{agent_name}' not found.");
            let deliver = manager.mark_error(task_id, &message);
            if let Some(deliver) = deliver {
                Self::deliver_quietly(
                    &deliver,
                    format!("Background task {task_id} failed: {message}"),
                )
                .await;
            }
            return;
        };

        // Background agents auto-approve: safety comes from the agent's
        // tool allow-list, not an absent human.
        let auto = Arc::new(PermissionManager::new(Arc::new(AutoApprover)));
        let base_prompt = self.base_prompt();
        let result = self
            .runner
            .run(&agent, task, context, &base_prompt, Some(auto))
            .await;

        if result.success() {
            let deliver = manager.mark_done(task_id, &result.response);
            if let Some(deliver) = deliver {
                Self::deliver_quietly(
                    &deliver,
                    format!(
                        "Background task {task_id} ({agent_name}) completed:\n\n{}",
                        result.response
                    ),
                )
                .await;
            }
        } else {
            let deliver = manager.mark_error(task_id, &result.error);
            if let Some(deliver) = deliver {
                Self::deliver_quietly(
                    &deliver,
                    format!(
                        "Background task {task_id} ({agent_name}) failed:\n{}",
                        result.error
                    ),
                )
                .await;
            }
        }
    }

    /// Invoke a delivery callback; failures are logged, never re-raised.
    async fn deliver_quietly(deliver: &crate::background::DeliveryCallback, message: String) {
        let fut = AssertUnwindSafe(deliver(message));
        if fut.catch_unwind().await.is_err() {
            error!("failed to deliver background task notice");
        }
    }

    fn format_task_status(&self, task_id: &str) -> String {
        let Some(manager) = self.background.as_ref() else {
            return "Background tasks not available.".to_string();
        };
        let Some(task) = manager.get(task_id) else {
            return format!("No task found with ID: {task_id}");
        };
        let mut info = format!("Task {} ({}): {}", task.id, task.agent_name, task.status);
        match task.status {
            TaskStatus::Done => info.push_str(&format!("\n\nResult:\n{}", task.result)),
            TaskStatus::Error => info.push_str(&format!("\n\nError: {}", task.error)),
            _ => {},
        }
        info
    }

    fn format_agent_list(&self) -> String {
        let agents = self.loader.list();
        if agents.is_empty() {
            return "No agents available.".to_string();
        }
        agents
            .iter()
            .map(|a| {
                let tools_info = if a.allowed_tools.is_empty() {
                    String::new()
                } else {
                    format!(" (tools: {})", a.allowed_tools.join(", "))
                };
                format!("- {}: {}{}", a.name, a.description, tools_info)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Register the delegation tools with the registry.
    pub async fn register_tools(self: &Arc<Self>, registry: &ToolRegistry) {
        registry
            .register(
                "list_agents",
                "List all available specialized agents that can be delegated to.",
                json!({"type": "object", "properties": {}}),
                ActionCategory::Read,
                self.list_agents_handler(),
            )
            .await;

        registry
            .register(
                "delegate_to_agent",
                "Delegate a task to a specialized agent. The agent runs autonomously with its \
                 own tool set and returns a result. Set background=true for long-running tasks \
                 (e.g. deep research) so the user can continue chatting while the agent works.",
                json!({
                    "type": "object",
                    "properties": {
                        "agent_name": {
                            "type": "string",
                            "description": "Name of the agent to delegate to",
                        },
                        "task": {
                            "type": "string",
                            "description": "The task or query for the agent",
                        },
                        "context": {
                            "type": "string",
                            "description": "Additional context to pass to the agent",
                            "default": "",
                        },
                        "background": {
                            "type": "boolean",
                            "description": "If true, run the agent in the background and return \
                                immediately with a task ID. Results are delivered asynchronously.",
                            "default": false,
                        },
                    },
                    "required": ["agent_name", "task"],
                }),
                ActionCategory::Write,
                self.delegate_handler(),
            )
            .await;

        registry
            .register(
                "delegate_parallel",
                "Delegate tasks to multiple agents in parallel. Each delegation specifies an \
                 agent_name and task.",
                json!({
                    "type": "object",
                    "properties": {
                        "delegations": {
                            "type": "array",
                            "description": "List of delegations, each with agent_name, task, \
                                and optional context",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "agent_name": {"type": "string"},
                                    "task": {"type": "string"},
                                    "context": {"type": "string", "default": ""},
                                },
                                "required": ["agent_name", "task"],
                            },
                        },
                    },
                    "required": ["delegations"],
                }),
                ActionCategory::Write,
                self.delegate_parallel_handler(),
            )
            .await;

        if self.background.is_some() {
            registry
                .register(
                    "task_status",
                    "Check the status or result of a background agent task.",
                    json!({
                        "type": "object",
                        "properties": {
                            "task_id": {
                                "type": "string",
                                "description": "The background task ID to check",
                            },
                        },
                        "required": ["task_id"],
                    }),
                    ActionCategory::Read,
                    self.task_status_handler(),
                )
                .await;
        }
    }

    fn list_agents_handler(self: &Arc<Self>) -> ToolHandler {
        let orchestrator = Arc::clone(self);
        Arc::new(move |_input: Value| {
            let orchestrator = Arc::clone(&orchestrator);
            Box::pin(async move { Ok(orchestrator.format_agent_list()) })
        })
    }

    fn delegate_handler(self: &Arc<Self>) -> ToolHandler {
        let orchestrator = Arc::clone(self);
        Arc::new(move |input: Value| {
            let orchestrator = Arc::clone(&orchestrator);
            Box::pin(async move {
                let agent_name = input
                    .get("agent_name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let task = input
                    .get("task")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let context = input
                    .get("context")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let background = input
                    .get("background")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);

                if background {
                    if let Some(task_id) =
                        orchestrator.spawn_background(&agent_name, &task, &context)
                    {
                        return Ok(format!(
                            "Background task started: {task_id}. Results will be delivered \
                             when complete. Use task_status to check progress."
                        ));
                    }
                }

                let result = orchestrator.delegate(&agent_name, &task, &context).await;
                if result.success() {
                    Ok(result.response)
                } else {
                    Ok(format!("Agent error: {}", result.error))
                }
            })
        })
    }

    fn delegate_parallel_handler(self: &Arc<Self>) -> ToolHandler {
        let orchestrator = Arc::clone(self);
        Arc::new(move |input: Value| {
            let orchestrator = Arc::clone(&orchestrator);
            Box::pin(async move {
                let delegations: Vec<Delegation> = input
                    .get("delegations")
                    .cloned()
                    .map(serde_json::from_value)
                    .transpose()?
                    .unwrap_or_default();

                let results = orchestrator.delegate_parallel(&delegations).await;
                let output: Vec<String> = results
                    .iter()
                    .map(|r| {
                        if r.success() {
                            format!("[{}] {}", r.agent_name, r.response)
                        } else {
                            format!("[{}] Error: {}", r.agent_name, r.error)
                        }
                    })
                    .collect();
                Ok(output.join("\n\n---\n\n"))
            })
        })
    }

    fn task_status_handler(self: &Arc<Self>) -> ToolHandler {
        let orchestrator = Arc::clone(self);
        Arc::new(move |input: Value| {
            let orchestrator = Arc::clone(&orchestrator);
            Box::pin(async move {
                let task_id = input
                    .get("task_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                Ok(orchestrator.format_task_status(task_id))
            })
        })
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("background_enabled", &self.background.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::{DeliveryCallback, with_delivery};
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;
    use valet_audit::AuditLog;
    use valet_config::Settings;
    use valet_llm::{
        EventStream, LlmClient, LlmResult, LlmRouter, Message, Provider, StreamEvent, ToolCall,
        ToolDefinition,
    };

    /// Adapter whose first round calls `echo`, second round answers.
    struct EchoToolClient;

    #[async_trait::async_trait]
    impl LlmClient for EchoToolClient {
        fn provider(&self) -> Provider {
            Provider::Claude
        }
        fn model(&self) -> &str {
            "echo-tool"
        }
        async fn is_available(&self) -> bool {
            true
        }
        async fn stream_round(
            &self,
            _system: &str,
            messages: &[Message],
            _tools: &[ToolDefinition],
        ) -> LlmResult<EventStream> {
            // First round: single user message. Later rounds carry the
            // assistant/tool-result pair.
            let events = if messages.len() == 1 {
                vec![
                    StreamEvent::ToolUseStart { name: "echo".into() },
                    StreamEvent::ToolUseComplete {
                        tool_call: ToolCall::new("tu_1", "echo", json!({"text": "hi"})),
                    },
                ]
            } else {
                vec![StreamEvent::TextDelta { text: "done: Echo: hi".into() }]
            };
            Ok(Box::pin(futures::stream::iter(events)))
        }
    }

    /// Adapter that always fails the round.
    struct FailingClient;

    #[async_trait::async_trait]
    impl LlmClient for FailingClient {
        fn provider(&self) -> Provider {
            Provider::Claude
        }
        fn model(&self) -> &str {
            "failing"
        }
        async fn is_available(&self) -> bool {
            true
        }
        async fn stream_round(
            &self,
            _system: &str,
            _messages: &[Message],
            _tools: &[ToolDefinition],
        ) -> LlmResult<EventStream> {
            Ok(Box::pin(futures::stream::iter(vec![StreamEvent::Error {
                message: "provider down".into(),
            }])))
        }
    }

    struct Fixture {
        orchestrator: Arc<Orchestrator>,
        _dir: tempfile::TempDir,
    }

    async fn fixture(background: bool) -> Fixture {
        let dir = tempfile::tempdir().unwrap();

        // Agent definitions on disk.
        let agents_dir = dir.path().join("agents");
        std::fs::create_dir_all(&agents_dir).unwrap();
        std::fs::write(
            agents_dir.join("echo.yaml"),
            "name: echo\ndescription: Echoes text\nallowed_tools: [echo]\nmodel: claude/echo-tool\n",
        )
        .unwrap();
        std::fs::write(
            agents_dir.join("broken.yaml"),
            "name: broken\nmodel: claude/failing\n",
        )
        .unwrap();

        let audit = Arc::new(AuditLog::new(dir.path().join("audit.jsonl")).unwrap());
        let permissions = Arc::new(PermissionManager::new(Arc::new(AutoApprover)));
        let registry = Arc::new(ToolRegistry::new(permissions, audit));
        registry
            .register(
                "echo",
                "Echo the input text",
                json!({"type": "object"}),
                ActionCategory::Read,
                Arc::new(|input: Value| {
                    Box::pin(async move {
                        Ok(format!(
                            "Echo: {}",
                            input.get("text").and_then(Value::as_str).unwrap_or("")
                        ))
                    })
                }),
            )
            .await;

        let mut settings = Settings::default();
        settings.anthropic_api_key = "sk-test".to_string();
        let router = Arc::new(LlmRouter::new(settings));
        router
            .register_client(Provider::Claude, "echo-tool", Arc::new(EchoToolClient))
            .await;
        router
            .register_client(Provider::Claude, "failing", Arc::new(FailingClient))
            .await;

        let loader = Arc::new(AgentLoader::new(&agents_dir));
        let runner = Arc::new(AgentRunner::new(router, Arc::clone(&registry)));
        let bg = background.then(|| Arc::new(BackgroundTaskManager::with_capacity(10)));
        let orchestrator = Arc::new(Orchestrator::new(loader, runner, bg));
        orchestrator.register_tools(&registry).await;

        Fixture {
            orchestrator,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_foreground_delegation() {
        let f = fixture(false).await;
        let result = f.orchestrator.delegate("echo", "say hi", "").await;
        assert!(result.success(), "error: {}", result.error);
        assert_eq!(result.response, "done: Echo: hi");
        assert_eq!(result.tool_calls_made.len(), 1);
        assert_eq!(result.tool_calls_made[0].name, "echo");
        assert_eq!(result.tool_calls_made[0].input, json!({"text": "hi"}));
    }

    #[tokio::test]
    async fn test_unknown_agent() {
        let f = fixture(false).await;
        let result = f.orchestrator.delegate("nobody", "task", "").await;
        assert_eq!(result.error, "Agent 'nobody' not found.");
    }

    #[tokio::test]
    async fn test_depth_limit() {
        let f = fixture(false).await;
        let orchestrator = Arc::clone(&f.orchestrator);

        // At depth 1 a further delegation still works (depth becomes 2).
        let result = DELEGATION_DEPTH
            .scope(1, orchestrator.delegate("echo", "hi", ""))
            .await;
        assert!(result.success());

        // At the limit, delegation is refused.
        let result = DELEGATION_DEPTH
            .scope(2, orchestrator.delegate("echo", "hi", ""))
            .await;
        assert!(result.error.contains("Maximum delegation depth (2) exceeded"));
    }

    #[tokio::test]
    async fn test_depth_isolated_across_concurrent_requests() {
        let f = fixture(false).await;
        let a = Arc::clone(&f.orchestrator);
        let b = Arc::clone(&f.orchestrator);

        // One request is at the limit, the other at top level; they must
        // not interfere.
        let (blocked, fine) = tokio::join!(
            DELEGATION_DEPTH.scope(2, a.delegate("echo", "hi", "")),
            b.delegate("echo", "hi", ""),
        );
        assert!(!blocked.success());
        assert!(fine.success());
    }

    #[tokio::test]
    async fn test_parallel_preserves_order() {
        let f = fixture(false).await;
        let delegations = vec![
            Delegation {
                agent_name: "echo".into(),
                task: "one".into(),
                context: String::new(),
            },
            Delegation {
                agent_name: "nobody".into(),
                task: "two".into(),
                context: String::new(),
            },
            Delegation {
                agent_name: "broken".into(),
                task: "three".into(),
                context: String::new(),
            },
        ];
        let results = f.orchestrator.delegate_parallel(&delegations).await;
        assert_eq!(results.len(), 3);
        assert!(results[0].success());
        assert_eq!(results[1].error, "Agent 'nobody' not found.");
        assert_eq!(results[2].error, "provider down");
    }

    #[tokio::test]
    async fn test_background_delegation_delivers() {
        let f = fixture(true).await;
        let received: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&received);
        let callback: DeliveryCallback = Arc::new(move |msg: String| {
            let log = Arc::clone(&log);
            Box::pin(async move {
                log.lock().unwrap().push(msg);
            })
        });

        let orchestrator = Arc::clone(&f.orchestrator);
        let task_id = with_delivery(Some(callback), async move {
            orchestrator
                .spawn_background("echo", "say hi", "")
                .expect("background enabled")
        })
        .await;

        // Wait for the detached run to finish and deliver.
        for _ in 0..100 {
            if !received.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let messages = received.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(
            messages[0].starts_with(&format!("Background task {task_id} (echo) completed")),
            "unexpected delivery: {}",
            messages[0]
        );
    }

    #[tokio::test]
    async fn test_background_error_path() {
        let f = fixture(true).await;
        let received: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&received);
        let callback: DeliveryCallback = Arc::new(move |msg: String| {
            let log = Arc::clone(&log);
            Box::pin(async move {
                log.lock().unwrap().push(msg);
            })
        });

        let orchestrator = Arc::clone(&f.orchestrator);
        let task_id = with_delivery(Some(callback), async move {
            orchestrator.spawn_background("broken", "boom", "").unwrap()
        })
        .await;

        for _ in 0..100 {
            if !received.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let task = f.orchestrator.background.as_ref().unwrap().get(&task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.error, "provider down");
        assert!(received.lock().unwrap()[0].contains("failed"));
    }

    #[tokio::test]
    async fn test_task_status_tool_output() {
        let f = fixture(true).await;
        let manager = f.orchestrator.background.as_ref().unwrap();
        let record = manager.create("echo", "work", None);
        manager.mark_done(&record.id, "the answer");

        let status = f.orchestrator.format_task_status(&record.id);
        assert!(status.contains(&format!("Task {} (echo): done", record.id)));
        assert!(status.contains("the answer"));

        assert_eq!(
            f.orchestrator.format_task_status("deadbeef"),
            "No task found with ID: deadbeef"
        );
    }

    #[tokio::test]
    async fn test_list_agents_format() {
        let f = fixture(false).await;
        let listing = f.orchestrator.format_agent_list();
        assert!(listing.contains("- echo: Echoes text (tools: echo)"));
        assert!(listing.contains("- broken:"));
    }
}
