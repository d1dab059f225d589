#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Provider-neutral streaming LLM clients with a tool-use loop.
//!
//! Three wire formats (Anthropic message-block, OpenAI-compatible, AWS
//! Converse) are normalised behind one streaming contract: an adapter
//! produces a lazy stream of [`StreamEvent`]s for a single round, and the
//! central loop in [`client::stream_with_tool_loop`] drives the iterative
//! "think → call tools → continue" protocol on top of it. The
//! [`LlmRouter`] selects a provider per request and caches clients.

mod bedrock;
mod claude;
pub mod client;
mod error;
mod openai_compat;
mod router;
mod types;

pub use bedrock::BedrockClient;
pub use claude::ClaudeClient;
pub use client::{EventStream, LlmClient, ProviderConfig, ToolExecutor, stream_with_tool_loop};
pub use error::{LlmError, LlmResult};
pub use openai_compat::OpenAiCompatClient;
pub use router::LlmRouter;
pub use types::{
    ContentBlock, Message, MessageContent, Provider, Role, StreamEvent, ToolCall, ToolDefinition,
    ToolResult,
};
