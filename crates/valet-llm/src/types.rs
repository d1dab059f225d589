//! Canonical message, tool, and stream-event types.
//!
//! All provider adapters translate to and from this model. The canonical
//! wire shape follows the message-block convention: content is either a
//! plain string or an ordered sequence of typed blocks.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User message (includes tool results).
    User,
    /// Assistant message (includes tool use requests).
    Assistant,
}

/// A message in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Message role.
    pub role: Role,
    /// Message content.
    pub content: MessageContent,
}

impl Message {
    /// Create a user message with plain text content.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(content.into()),
        }
    }

    /// Create an assistant message with plain text content.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(content.into()),
        }
    }

    /// Create an assistant message from content blocks.
    #[must_use]
    pub fn assistant_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Blocks(blocks),
        }
    }

    /// Create a user message carrying tool results.
    #[must_use]
    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Blocks(
                results
                    .into_iter()
                    .map(|r| ContentBlock::ToolResult {
                        tool_use_id: r.tool_use_id,
                        content: r.content,
                        is_error: r.is_error,
                    })
                    .collect(),
            ),
        }
    }

    /// Get text content if this is a plain text message.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(s) => Some(s),
            MessageContent::Blocks(_) => None,
        }
    }

    /// Approximate character length of the content (context heuristics).
    #[must_use]
    pub fn content_len(&self) -> usize {
        match &self.content {
            MessageContent::Text(s) => s.len(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .map(|b| match b {
                    ContentBlock::Text { text } => text.len(),
                    ContentBlock::ToolResult { content, .. } => content.len(),
                    ContentBlock::ToolUse { input, .. } => input.to_string().len(),
                    ContentBlock::Image { data, .. } => data.len(),
                })
                .sum(),
        }
    }
}

/// Message content: a plain string or an ordered block sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text content.
    Text(String),
    /// Ordered content blocks.
    Blocks(Vec<ContentBlock>),
}

/// A typed content block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Text content.
    Text {
        /// The text.
        text: String,
    },
    /// A tool invocation requested by the assistant.
    ToolUse {
        /// Call id, unique within the conversation.
        id: String,
        /// Tool name.
        name: String,
        /// Structured input.
        input: Value,
    },
    /// The result of a tool invocation, sent back by the user turn.
    ToolResult {
        /// Id of the `ToolUse` block this answers.
        tool_use_id: String,
        /// Result content.
        content: String,
        /// Whether the tool errored.
        #[serde(default)]
        is_error: bool,
    },
    /// An image, base64-encoded.
    Image {
        /// MIME type, e.g. `image/png`.
        media_type: String,
        /// Base64 payload.
        data: String,
    },
}

/// A tool call emitted by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Opaque call id, unique within a conversation.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Structured input object.
    pub input: Value,
}

impl ToolCall {
    /// Create a new tool call.
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
        }
    }
}

/// Result of a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Id of the tool call this answers.
    pub tool_use_id: String,
    /// Result content.
    pub content: String,
    /// Whether this is an error result.
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    /// Create a successful result.
    pub fn success(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    /// Create an error result.
    pub fn error(tool_use_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content: error.into(),
            is_error: true,
        }
    }
}

/// Tool definition handed to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name, unique within the registry.
    pub name: String,
    /// Description shown to the model.
    pub description: String,
    /// Input JSON schema.
    pub input_schema: Value,
}

impl ToolDefinition {
    /// Create a new tool definition.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// LLM provider tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Anthropic Claude (message-block wire format).
    Claude,
    /// Local Ollama server (OpenAI-compatible wire format).
    Ollama,
    /// OpenAI (OpenAI-compatible wire format).
    OpenAi,
    /// AWS Bedrock (Converse wire format).
    Bedrock,
}

impl Provider {
    /// Stable lowercase key, used in `provider/model` references.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Ollama => "ollama",
            Self::OpenAi => "openai",
            Self::Bedrock => "bedrock",
        }
    }

    /// Parse a provider key.
    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "claude" => Some(Self::Claude),
            "ollama" => Some(Self::Ollama),
            "openai" => Some(Self::OpenAi),
            "bedrock" => Some(Self::Bedrock),
            _ => None,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Streaming event emitted by adapters and the tool-use loop.
///
/// A complete stream terminates with exactly one of [`StreamEvent::MessageComplete`]
/// or [`StreamEvent::Error`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Partial text output.
    TextDelta {
        /// The text fragment.
        text: String,
    },
    /// A tool-use block opened.
    ToolUseStart {
        /// Tool name (may be empty if the provider reveals it later).
        name: String,
    },
    /// A tool-use block closed with fully accumulated arguments.
    ToolUseComplete {
        /// The completed call.
        tool_call: ToolCall,
    },
    /// The final text of the turn.
    MessageComplete {
        /// Full accumulated text.
        text: String,
    },
    /// Which provider/model the router selected.
    RoutingInfo {
        /// Selected provider.
        provider: Provider,
        /// Selected model.
        model: String,
    },
    /// Terminal error.
    Error {
        /// Error message.
        message: String,
    },
}
