//! Provider client trait and the central tool-use loop.
//!
//! Adapters implement one streaming primitive ([`LlmClient::stream_round`]);
//! the iterative "think → call tools → continue" protocol is driven once,
//! here, for all providers.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

use crate::error::LlmResult;
use crate::types::{
    ContentBlock, Message, Provider, StreamEvent, ToolCall, ToolDefinition, ToolResult,
};

/// Boxed stream of events.
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Callback that executes a single tool call.
pub type ToolExecutor = Arc<dyn Fn(ToolCall) -> BoxFuture<'static, ToolResult> + Send + Sync>;

/// Message appended when the round budget is exhausted, before the final
/// summary round.
const SUMMARY_PROMPT: &str = "You've used all available tool rounds. Please summarize what \
     you've accomplished so far and what remains to be done.";

/// A streaming LLM provider client.
///
/// One instance per (provider, model) pair. Implementations translate the
/// canonical message model to their wire format and back.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// The provider tag.
    fn provider(&self) -> Provider;

    /// The model being used.
    fn model(&self) -> &str;

    /// Check if the provider is reachable/configured.
    async fn is_available(&self) -> bool;

    /// Run a single streaming round.
    ///
    /// The returned stream yields `TextDelta`, `ToolUseStart`, and
    /// `ToolUseComplete` events as deltas arrive, plus at most one terminal
    /// `Error`. It does **not** yield `MessageComplete`; turn completion is
    /// the loop driver's concern.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be started (missing key,
    /// connection failure, non-success status).
    async fn stream_round(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> LlmResult<EventStream>;

    /// Release provider resources. Called once at shutdown.
    async fn close(&self) {}
}

/// Configuration shared by provider clients.
#[derive(Clone)]
pub struct ProviderConfig {
    /// API key (empty when the provider needs none).
    pub api_key: String,
    /// Model name.
    pub model: String,
    /// Maximum tokens to generate.
    pub max_tokens: usize,
    /// API base URL override.
    pub base_url: Option<String>,
    /// Region (Bedrock).
    pub region: Option<String>,
}

impl ProviderConfig {
    /// Create a new config with API key and model.
    #[must_use]
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            max_tokens: 8192,
            base_url: None,
            region: None,
        }
    }

    /// Set max tokens.
    #[must_use]
    pub fn max_tokens(mut self, max: usize) -> Self {
        self.max_tokens = max;
        self
    }

    /// Set base URL.
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set region.
    #[must_use]
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("has_api_key", &!self.api_key.is_empty())
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("has_base_url", &self.base_url.is_some())
            .finish()
    }
}

/// Drive the full tool-use loop over any adapter.
///
/// Forwards adapter events to the caller in real time. When a round ends
/// with pending tool calls, executes them sequentially in emission order via
/// `executor`, appends the assistant/tool-result message pair, and starts
/// the next round. Terminates with exactly one `MessageComplete` or `Error`.
///
/// When `max_tool_rounds` rounds have been consumed without a final answer,
/// a summary request is appended and one more round runs without tools.
pub fn stream_with_tool_loop(
    client: Arc<dyn LlmClient>,
    system: String,
    messages: Vec<Message>,
    tools: Vec<ToolDefinition>,
    executor: Option<ToolExecutor>,
    max_tool_rounds: usize,
) -> EventStream {
    let stream = async_stream::stream! {
        let mut current = messages;

        for round in 0..max_tool_rounds {
            debug!(round, model = client.model(), "starting tool-loop round");

            let mut round_stream = match client.stream_round(&system, &current, &tools).await {
                Ok(s) => s,
                Err(e) => {
                    yield StreamEvent::Error { message: e.to_string() };
                    return;
                },
            };

            let mut text = String::new();
            let mut calls: Vec<ToolCall> = Vec::new();

            while let Some(event) = round_stream.next().await {
                match event {
                    StreamEvent::TextDelta { text: t } => {
                        text.push_str(&t);
                        yield StreamEvent::TextDelta { text: t };
                    },
                    StreamEvent::ToolUseStart { .. } => yield event,
                    StreamEvent::ToolUseComplete { tool_call } => {
                        calls.push(tool_call.clone());
                        yield StreamEvent::ToolUseComplete { tool_call };
                    },
                    StreamEvent::Error { message } => {
                        yield StreamEvent::Error { message };
                        return;
                    },
                    // Rounds never produce these; drop defensively.
                    StreamEvent::MessageComplete { .. } | StreamEvent::RoutingInfo { .. } => {},
                }
            }

            if calls.is_empty() {
                yield StreamEvent::MessageComplete { text };
                return;
            }

            // Assistant message carrying the text and tool_use blocks.
            let mut blocks = Vec::new();
            if !text.is_empty() {
                blocks.push(ContentBlock::Text { text });
            }
            for call in &calls {
                blocks.push(ContentBlock::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.input.clone(),
                });
            }
            current.push(Message::assistant_blocks(blocks));

            // Execute sequentially, preserving emission order in the reply.
            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                let result = match &executor {
                    Some(execute) => execute(call.clone()).await,
                    None => ToolResult::error(call.id.clone(), "No tool executor configured"),
                };
                results.push(result);
            }
            current.push(Message::tool_results(results));
        }

        // Round budget exhausted: ask for a summary, no tools this time.
        current.push(Message::user(SUMMARY_PROMPT));

        let mut summary_stream = match client.stream_round(&system, &current, &[]).await {
            Ok(s) => s,
            Err(e) => {
                yield StreamEvent::Error { message: e.to_string() };
                return;
            },
        };

        let mut summary = String::new();
        while let Some(event) = summary_stream.next().await {
            match event {
                StreamEvent::TextDelta { text: t } => {
                    summary.push_str(&t);
                    yield StreamEvent::TextDelta { text: t };
                },
                StreamEvent::Error { message } => {
                    yield StreamEvent::Error { message };
                    return;
                },
                _ => {},
            }
        }

        yield StreamEvent::MessageComplete { text: summary };
    };

    Box::pin(stream)
}

/// Approximate token count for a message list (4 chars per token).
#[must_use]
pub fn approx_tokens(messages: &[Message]) -> usize {
    let chars: usize = messages.iter().map(Message::content_len).sum();
    chars / 4
}
