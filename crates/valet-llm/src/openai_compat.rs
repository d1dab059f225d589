//! OpenAI-compatible chat-completions provider.
//!
//! Shared by the OpenAI and Ollama clients, which speak the same wire
//! format and differ only in endpoint, auth, and availability probing.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::debug;

use crate::client::{EventStream, LlmClient, ProviderConfig};
use crate::error::{LlmError, LlmResult};
use crate::types::{
    ContentBlock, Message, MessageContent, Provider, Role, StreamEvent, ToolCall, ToolDefinition,
};

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const OPENAI_MODELS_URL: &str = "https://api.openai.com/v1/models";

/// Client for OpenAI-compatible chat completion APIs.
pub struct OpenAiCompatClient {
    client: Client,
    config: ProviderConfig,
    provider: Provider,
}

impl OpenAiCompatClient {
    /// Create a client for a local Ollama server.
    #[must_use]
    pub fn ollama(config: ProviderConfig) -> Self {
        Self {
            client: Client::new(),
            config,
            provider: Provider::Ollama,
        }
    }

    /// Create a client for the OpenAI API.
    #[must_use]
    pub fn openai(config: ProviderConfig) -> Self {
        Self {
            client: Client::new(),
            config,
            provider: Provider::OpenAi,
        }
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or("http://localhost:11434")
            .trim_end_matches('/')
    }

    fn chat_url(&self) -> String {
        match self.provider {
            Provider::OpenAi => self
                .config
                .base_url
                .clone()
                .unwrap_or_else(|| OPENAI_CHAT_URL.to_string()),
            _ => format!("{}/v1/chat/completions", self.base_url()),
        }
    }

    fn label(&self) -> &'static str {
        match self.provider {
            Provider::OpenAi => "OpenAI",
            _ => "Ollama",
        }
    }

    fn bearer_token(&self) -> Option<&str> {
        match self.provider {
            Provider::OpenAi => Some(self.config.api_key.as_str()),
            _ => None,
        }
    }

    /// Convert canonical tool definitions to OpenAI function format.
    fn convert_tools(tools: &[ToolDefinition]) -> Vec<Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema,
                    },
                })
            })
            .collect()
    }

    /// Convert canonical messages to OpenAI format, system prompt leading.
    fn convert_messages(system: &str, messages: &[Message]) -> Vec<Value> {
        let mut out = Vec::with_capacity(messages.len().saturating_add(1));
        if !system.is_empty() {
            out.push(json!({"role": "system", "content": system}));
        }

        for msg in messages {
            match (&msg.role, &msg.content) {
                (Role::User, MessageContent::Text(text)) => {
                    out.push(json!({"role": "user", "content": text}));
                },
                (Role::Assistant, MessageContent::Text(text)) => {
                    out.push(json!({"role": "assistant", "content": text}));
                },
                (Role::User, MessageContent::Blocks(blocks)) => {
                    let has_tool_results = blocks
                        .iter()
                        .any(|b| matches!(b, ContentBlock::ToolResult { .. }));
                    if has_tool_results {
                        // Tool results become individual role:"tool" messages.
                        for block in blocks {
                            if let ContentBlock::ToolResult {
                                tool_use_id,
                                content,
                                ..
                            } = block
                            {
                                out.push(json!({
                                    "role": "tool",
                                    "tool_call_id": tool_use_id,
                                    "content": content,
                                }));
                            }
                        }
                    } else {
                        out.push(json!({
                            "role": "user",
                            "content": Self::convert_user_parts(blocks),
                        }));
                    }
                },
                (Role::Assistant, MessageContent::Blocks(blocks)) => {
                    let mut text = String::new();
                    let mut tool_calls = Vec::new();
                    for block in blocks {
                        match block {
                            ContentBlock::Text { text: t } => text.push_str(t),
                            ContentBlock::ToolUse { id, name, input } => {
                                tool_calls.push(json!({
                                    "id": id,
                                    "type": "function",
                                    "function": {
                                        "name": name,
                                        "arguments": input.to_string(),
                                    },
                                }));
                            },
                            _ => {},
                        }
                    }
                    let mut m = json!({"role": "assistant"});
                    if !text.is_empty() {
                        m["content"] = Value::String(text);
                    }
                    if !tool_calls.is_empty() {
                        m["tool_calls"] = Value::Array(tool_calls);
                    }
                    out.push(m);
                },
            }
        }

        out
    }

    /// User block content: plain string, or multipart when images appear.
    fn convert_user_parts(blocks: &[ContentBlock]) -> Value {
        let has_images = blocks.iter().any(|b| matches!(b, ContentBlock::Image { .. }));
        if !has_images {
            let text: String = blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            return Value::String(text);
        }

        let parts: Vec<Value> = blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(json!({"type": "text", "text": text})),
                ContentBlock::Image { media_type, data } => Some(json!({
                    "type": "image_url",
                    "image_url": {"url": format!("data:{media_type};base64,{data}")},
                })),
                _ => None,
            })
            .collect();
        Value::Array(parts)
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn is_available(&self) -> bool {
        match self.provider {
            Provider::OpenAi => {
                if self.config.api_key.is_empty() {
                    return false;
                }
                let request = self
                    .client
                    .get(OPENAI_MODELS_URL)
                    .bearer_auth(&self.config.api_key);
                matches!(request.send().await, Ok(r) if r.status().is_success())
            },
            _ => {
                let url = format!("{}/api/tags", self.base_url());
                matches!(self.client.get(url).send().await, Ok(r) if r.status().is_success())
            },
        }
    }

    #[allow(clippy::too_many_lines)]
    async fn stream_round(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> LlmResult<EventStream> {
        if self.provider == Provider::OpenAi && self.config.api_key.is_empty() {
            return Err(LlmError::ApiKeyNotConfigured {
                provider: "openai".to_string(),
            });
        }

        let mut request_body = json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "messages": Self::convert_messages(system, messages),
            "stream": true,
        });
        if !tools.is_empty() {
            request_body["tools"] = Value::Array(Self::convert_tools(tools));
        }

        debug!(model = self.config.model, provider = %self.provider, "starting stream");

        let mut request = self.client.post(self.chat_url()).json(&request_body);
        if let Some(token) = self.bearer_token() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let label = self.label();

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiRequestFailed(format!(
                "{label} API error: {status} - {body}"
            )));
        }

        let stream = async_stream::stream! {
            let mut bytes_stream = response.bytes_stream();
            let mut buffer = String::new();
            // Partial tool calls keyed by stream index; BTreeMap keeps
            // emission order deterministic at flush time.
            let mut partial_calls: BTreeMap<usize, PartialToolCall> = BTreeMap::new();

            'outer: while let Some(chunk) = bytes_stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield StreamEvent::Error {
                            message: format!("{label} connection error: {e}"),
                        };
                        return;
                    },
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim().to_string();
                    buffer = buffer[line_end.saturating_add(1)..].to_string();

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if data == "[DONE]" {
                        break 'outer;
                    }
                    let Ok(parsed) = serde_json::from_str::<Value>(data) else {
                        continue;
                    };

                    let delta = &parsed["choices"][0]["delta"];

                    if let Some(content) = delta["content"].as_str() {
                        if !content.is_empty() {
                            yield StreamEvent::TextDelta { text: content.to_string() };
                        }
                    }

                    if let Some(tool_deltas) = delta["tool_calls"].as_array() {
                        for tc_delta in tool_deltas {
                            let idx = tc_delta["index"].as_u64().unwrap_or(0) as usize;
                            let is_new = !partial_calls.contains_key(&idx);
                            let entry = partial_calls.entry(idx).or_default();

                            if let Some(id) = tc_delta["id"].as_str() {
                                entry.id = id.to_string();
                            }
                            if let Some(name) = tc_delta["function"]["name"].as_str() {
                                entry.name.push_str(name);
                            }
                            if let Some(args) = tc_delta["function"]["arguments"].as_str() {
                                entry.arguments.push_str(args);
                            }

                            if is_new {
                                yield StreamEvent::ToolUseStart {
                                    name: entry.name.clone(),
                                };
                            }
                        }
                    }
                }
            }

            // Flush completed tool calls in index order.
            for (idx, partial) in partial_calls {
                let input = if partial.arguments.is_empty() {
                    json!({})
                } else {
                    serde_json::from_str(&partial.arguments).unwrap_or_else(|_| json!({}))
                };
                let id = if partial.id.is_empty() {
                    format!("tool_{idx}")
                } else {
                    partial.id
                };
                yield StreamEvent::ToolUseComplete {
                    tool_call: ToolCall::new(id, partial.name, input),
                };
            }
        };

        Ok(Box::pin(stream))
    }
}

#[derive(Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolResult;

    fn openai_client() -> OpenAiCompatClient {
        OpenAiCompatClient::openai(ProviderConfig::new("sk-test", "gpt-4o-mini"))
    }

    #[test]
    fn test_system_message_leads() {
        let messages = vec![Message::user("hi")];
        let converted = OpenAiCompatClient::convert_messages("be brief", &messages);
        assert_eq!(converted[0]["role"], "system");
        assert_eq!(converted[0]["content"], "be brief");
        assert_eq!(converted[1]["role"], "user");
    }

    #[test]
    fn test_tool_results_become_tool_messages() {
        let messages = vec![Message::tool_results(vec![
            ToolResult::success("call_1", "sunny"),
            ToolResult::error("call_2", "boom"),
        ])];
        let converted = OpenAiCompatClient::convert_messages("", &messages);
        assert_eq!(converted.len(), 2);
        assert_eq!(converted[0]["role"], "tool");
        assert_eq!(converted[0]["tool_call_id"], "call_1");
        assert_eq!(converted[1]["content"], "boom");
    }

    #[test]
    fn test_assistant_tool_calls_have_string_arguments() {
        let messages = vec![Message::assistant_blocks(vec![
            ContentBlock::Text { text: "checking".into() },
            ContentBlock::ToolUse {
                id: "call_1".into(),
                name: "get_weather".into(),
                input: json!({"location": "Lisbon"}),
            },
        ])];
        let converted = OpenAiCompatClient::convert_messages("", &messages);
        assert_eq!(converted[0]["role"], "assistant");
        assert_eq!(converted[0]["content"], "checking");
        let args = converted[0]["tool_calls"][0]["function"]["arguments"]
            .as_str()
            .unwrap();
        let parsed: Value = serde_json::from_str(args).unwrap();
        assert_eq!(parsed["location"], "Lisbon");
    }

    #[test]
    fn test_image_blocks_become_data_urls() {
        let messages = vec![Message {
            role: Role::User,
            content: MessageContent::Blocks(vec![
                ContentBlock::Text { text: "what is this".into() },
                ContentBlock::Image {
                    media_type: "image/jpeg".into(),
                    data: "abc123".into(),
                },
            ]),
        }];
        let converted = OpenAiCompatClient::convert_messages("", &messages);
        let parts = converted[0]["content"].as_array().unwrap();
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(
            parts[1]["image_url"]["url"],
            "data:image/jpeg;base64,abc123"
        );
    }

    #[test]
    fn test_convert_tools() {
        let tools = vec![ToolDefinition::new(
            "echo",
            "Echo text",
            json!({"type": "object", "properties": {"text": {"type": "string"}}}),
        )];
        let converted = OpenAiCompatClient::convert_tools(&tools);
        assert_eq!(converted[0]["type"], "function");
        assert_eq!(converted[0]["function"]["name"], "echo");
        assert_eq!(converted[0]["function"]["parameters"]["type"], "object");
    }

    #[tokio::test]
    async fn test_openai_requires_api_key() {
        let client = OpenAiCompatClient::openai(ProviderConfig::new("", "gpt-4o-mini"));
        let err = client.stream_round("", &[], &[]).await.err().unwrap();
        assert!(matches!(err, LlmError::ApiKeyNotConfigured { .. }));
    }

    #[test]
    fn test_urls() {
        let ollama = OpenAiCompatClient::ollama(
            ProviderConfig::new("", "llama3.2").base_url("http://localhost:11434/"),
        );
        assert_eq!(
            ollama.chat_url(),
            "http://localhost:11434/v1/chat/completions"
        );
        assert_eq!(openai_client().chat_url(), OPENAI_CHAT_URL);
    }
}
