//! Chat service: the core side of the transport adapter contract.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use valet_agents::{DeliveryCallback, with_delivery};
use valet_approval::PermissionManager;
use valet_config::Settings;
use valet_llm::{LlmRouter, Message, StreamEvent, ToolExecutor};
use valet_scheduler::AssistantJob;
use valet_tools::ToolRegistry;

use crate::session::SessionManager;

/// Tool-loop round budget for main conversations.
const MAX_TOOL_ROUNDS: usize = 10;

/// Turns a user message into an assistant response: session assembly, the
/// routed tool-use loop, and history bookkeeping.
///
/// Transports call [`ChatService::get_response`] with their session key and
/// optionally their own approver and delivery callback; the scheduler uses
/// the same path under the `"scheduler"` session.
pub struct ChatService {
    settings: Settings,
    router: Arc<LlmRouter>,
    registry: Arc<ToolRegistry>,
    sessions: Arc<SessionManager>,
    base_system_prompt: String,
}

impl ChatService {
    /// Create a chat service over the shared router and registry.
    #[must_use]
    pub fn new(
        settings: Settings,
        router: Arc<LlmRouter>,
        registry: Arc<ToolRegistry>,
        sessions: Arc<SessionManager>,
    ) -> Self {
        Self {
            settings,
            router,
            registry,
            sessions,
            base_system_prompt: String::new(),
        }
    }

    /// Set the base system prompt (identity, durable memory).
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.base_system_prompt = prompt.into();
        self
    }

    /// The session manager backing this service.
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Process one user message and return the assistant's response text.
    ///
    /// Errors never escape: provider failures come back as `"Error: ..."`
    /// text so the transport always has something to render. The delivery
    /// callback (for background-task completions spawned during this turn)
    /// is installed in the task-local scope for the duration of the call.
    pub async fn get_response(
        &self,
        session_key: &str,
        user_input: &str,
        approver: Option<Arc<PermissionManager>>,
        delivery: Option<DeliveryCallback>,
    ) -> String {
        with_delivery(
            delivery,
            self.respond(session_key, user_input, approver),
        )
        .await
    }

    async fn respond(
        &self,
        session_key: &str,
        user_input: &str,
        approver: Option<Arc<PermissionManager>>,
    ) -> String {
        self.sessions.clear_tool_calls(session_key);
        self.sessions
            .append_message(session_key, Message::user(user_input));

        let messages = self
            .sessions
            .context(session_key, self.settings.max_context_messages);
        let tools = self.registry.definitions().await;
        let executor = self.session_executor(session_key, approver);

        let mut stream = self
            .router
            .stream_with_tool_loop(
                self.base_system_prompt.clone(),
                messages,
                tools,
                Some(executor),
                MAX_TOOL_ROUNDS,
                None,
            )
            .await;

        let mut response = String::new();
        while let Some(event) = stream.next().await {
            match event {
                StreamEvent::TextDelta { text } => response.push_str(&text),
                StreamEvent::MessageComplete { text } => response = text,
                StreamEvent::RoutingInfo { provider, model } => {
                    debug!(%provider, %model, session = session_key, "routed");
                },
                StreamEvent::Error { message } => {
                    warn!(session = session_key, error = %message, "turn failed");
                    return format!("Error: {message}");
                },
                StreamEvent::ToolUseStart { .. } | StreamEvent::ToolUseComplete { .. } => {},
            }
        }

        self.sessions
            .append_message(session_key, Message::assistant(response.clone()));
        response
    }

    /// Registry-backed executor that also records calls in the session.
    fn session_executor(
        &self,
        session_key: &str,
        approver: Option<Arc<PermissionManager>>,
    ) -> ToolExecutor {
        let registry = Arc::clone(&self.registry);
        let sessions = Arc::clone(&self.sessions);
        let session_key = session_key.to_string();
        Arc::new(move |tool_call| {
            let registry = Arc::clone(&registry);
            let sessions = Arc::clone(&sessions);
            let session_key = session_key.clone();
            let approver = approver.clone();
            Box::pin(async move {
                let result = registry
                    .execute(&tool_call, &session_key, approver.as_deref())
                    .await;
                sessions.record_tool_call(
                    &session_key,
                    json!({
                        "name": tool_call.name,
                        "input": tool_call.input,
                        "is_error": result.is_error,
                    }),
                );
                result
            })
        })
    }
}

#[async_trait]
impl AssistantJob for ChatService {
    async fn get_response(&self, session_id: &str, prompt: &str) -> String {
        Self::get_response(self, session_id, prompt, None, None).await
    }
}

impl std::fmt::Debug for ChatService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatService").finish_non_exhaustive()
    }
}
