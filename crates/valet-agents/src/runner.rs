//! Agent runner: one isolated agent run with a scoped tool set.

use futures::StreamExt;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::warn;

use valet_approval::PermissionManager;
use valet_llm::{LlmRouter, Message, StreamEvent, ToolDefinition, ToolExecutor, ToolResult};
use valet_tools::ToolRegistry;

use crate::types::{AgentDefinition, AgentResult, ToolCallRecord};

/// Tools removed from non-delegating agents to prevent accidental
/// recursion.
const DELEGATION_TOOLS: &[&str] = &["delegate_to_agent", "delegate_parallel", "list_agents"];

/// Characters of tool output kept in an [`AgentResult`]'s call records.
const RECORD_OUTPUT_CHARS: usize = 500;

/// Runs an agent in an isolated conversation with scoped tools.
pub struct AgentRunner {
    router: Arc<LlmRouter>,
    registry: Arc<ToolRegistry>,
}

impl AgentRunner {
    /// Create a runner over the shared router and registry.
    #[must_use]
    pub fn new(router: Arc<LlmRouter>, registry: Arc<ToolRegistry>) -> Self {
        Self { router, registry }
    }

    /// Filter the registry's tool list to this agent's scope.
    async fn filter_tools(&self, agent: &AgentDefinition) -> Vec<ToolDefinition> {
        let all = self.registry.definitions().await;

        let mut tools: Vec<ToolDefinition> = if !agent.allowed_tools.is_empty() {
            all.into_iter()
                .filter(|t| agent.allowed_tools.contains(&t.name))
                .collect()
        } else if !agent.denied_tools.is_empty() {
            all.into_iter()
                .filter(|t| !agent.denied_tools.contains(&t.name))
                .collect()
        } else {
            all
        };

        if !agent.can_delegate {
            tools.retain(|t| !DELEGATION_TOOLS.contains(&t.name.as_str()));
        }
        tools
    }

    /// Run an agent on a task.
    ///
    /// The run is its own conversation: the caller's session is never
    /// touched. Out-of-scope tool calls are refused without reaching the
    /// registry.
    pub async fn run(
        &self,
        agent: &AgentDefinition,
        task: &str,
        context: &str,
        base_system_prompt: &str,
        approver_override: Option<Arc<PermissionManager>>,
    ) -> AgentResult {
        // System prompt: base identity, then the agent's role.
        let mut system_parts: Vec<String> = Vec::new();
        if !base_system_prompt.is_empty() {
            system_parts.push(base_system_prompt.to_string());
        }
        if !agent.system_prompt.is_empty() {
            system_parts.push(format!(
                "# Agent Role: {}\n\n{}",
                agent.name, agent.system_prompt
            ));
        }
        let system = system_parts.join("\n\n---\n\n");

        let user_content = if context.is_empty() {
            task.to_string()
        } else {
            format!("Context:\n{context}\n\nTask:\n{task}")
        };
        let messages = vec![Message::user(user_content)];

        let tools = self.filter_tools(agent).await;
        let allowed_names: HashSet<String> = tools.iter().map(|t| t.name.clone()).collect();

        let records: Arc<Mutex<Vec<ToolCallRecord>>> = Arc::new(Mutex::new(Vec::new()));
        let executor = scoped_executor(
            Arc::clone(&self.registry),
            allowed_names,
            Arc::clone(&records),
            approver_override,
        );

        let model_override = if agent.model.is_empty() {
            None
        } else {
            Some(agent.model.as_str())
        };

        let mut stream = self
            .router
            .stream_with_tool_loop(
                system,
                messages,
                tools,
                Some(executor),
                agent.max_tool_rounds,
                model_override,
            )
            .await;

        let mut response = String::new();
        while let Some(event) = stream.next().await {
            match event {
                StreamEvent::TextDelta { text } => response.push_str(&text),
                StreamEvent::MessageComplete { text } => response = text,
                StreamEvent::Error { message } => {
                    warn!(agent = %agent.name, error = %message, "agent run failed");
                    return AgentResult {
                        agent_name: agent.name.clone(),
                        response: String::new(),
                        tool_calls_made: take_records(&records),
                        error: message,
                    };
                },
                _ => {},
            }
        }

        AgentResult {
            agent_name: agent.name.clone(),
            response,
            tool_calls_made: take_records(&records),
            error: String::new(),
        }
    }
}

fn take_records(records: &Arc<Mutex<Vec<ToolCallRecord>>>) -> Vec<ToolCallRecord> {
    std::mem::take(&mut *records.lock().unwrap_or_else(|e| e.into_inner()))
}

/// Build the scoped tool executor for one agent run.
fn scoped_executor(
    registry: Arc<ToolRegistry>,
    allowed_names: HashSet<String>,
    records: Arc<Mutex<Vec<ToolCallRecord>>>,
    approver_override: Option<Arc<PermissionManager>>,
) -> ToolExecutor {
    Arc::new(move |tool_call| {
        let registry = Arc::clone(&registry);
        let allowed = allowed_names.clone();
        let records = Arc::clone(&records);
        let approver = approver_override.clone();
        Box::pin(async move {
            if !allowed.contains(&tool_call.name) {
                return ToolResult::error(
                    tool_call.id.clone(),
                    format!("Tool '{}' is not available to this agent.", tool_call.name),
                );
            }

            let result = registry
                .execute(&tool_call, "", approver.as_deref())
                .await;

            let mut output = result.content.clone();
            if output.len() > RECORD_OUTPUT_CHARS {
                let mut cut = RECORD_OUTPUT_CHARS;
                while !output.is_char_boundary(cut) {
                    cut = cut.saturating_sub(1);
                }
                output.truncate(cut);
            }
            records
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(ToolCallRecord {
                    name: tool_call.name.clone(),
                    input: tool_call.input.clone(),
                    output,
                });

            result
        })
    })
}
