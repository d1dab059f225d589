//! Claude (Anthropic) provider — message-block SSE wire format.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, error};

use crate::client::{EventStream, LlmClient, ProviderConfig};
use crate::error::{LlmError, LlmResult};
use crate::types::{
    ContentBlock, Message, MessageContent, Provider, Role, StreamEvent, ToolCall, ToolDefinition,
};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Claude provider client.
pub struct ClaudeClient {
    client: Client,
    config: ProviderConfig,
}

impl ClaudeClient {
    /// Create a new Claude client.
    #[must_use]
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    /// Build the API request body.
    fn build_request(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Value {
        let api_messages: Vec<Value> = messages.iter().map(Self::convert_message).collect();

        let mut request = json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "messages": api_messages,
            "stream": true,
        });

        if !system.is_empty() {
            request["system"] = Value::String(system.to_string());
        }

        if !tools.is_empty() {
            let api_tools: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.input_schema,
                    })
                })
                .collect();
            request["tools"] = Value::Array(api_tools);
        }

        request
    }

    /// Convert a canonical message to Anthropic format.
    fn convert_message(message: &Message) -> Value {
        let role = match message.role {
            Role::Assistant => "assistant",
            Role::User => "user",
        };

        match &message.content {
            MessageContent::Text(text) => json!({"role": role, "content": text}),
            MessageContent::Blocks(blocks) => {
                let content: Vec<Value> = blocks.iter().map(Self::convert_block).collect();
                json!({"role": role, "content": content})
            },
        }
    }

    fn convert_block(block: &ContentBlock) -> Value {
        match block {
            ContentBlock::Text { text } => json!({"type": "text", "text": text}),
            ContentBlock::ToolUse { id, name, input } => {
                json!({"type": "tool_use", "id": id, "name": name, "input": input})
            },
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                json!({
                    "type": "tool_result",
                    "tool_use_id": tool_use_id,
                    "content": content,
                    "is_error": is_error,
                })
            },
            ContentBlock::Image { media_type, data } => {
                json!({
                    "type": "image",
                    "source": {
                        "type": "base64",
                        "media_type": media_type,
                        "data": data,
                    }
                })
            },
        }
    }
}

#[async_trait]
impl LlmClient for ClaudeClient {
    fn provider(&self) -> Provider {
        Provider::Claude
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn is_available(&self) -> bool {
        !self.config.api_key.is_empty()
    }

    #[allow(clippy::too_many_lines)]
    async fn stream_round(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> LlmResult<EventStream> {
        if self.config.api_key.is_empty() {
            return Err(LlmError::ApiKeyNotConfigured {
                provider: "claude".to_string(),
            });
        }

        let request_body = self.build_request(system, messages, tools);
        let url = self.config.base_url.as_deref().unwrap_or(ANTHROPIC_API_URL);

        debug!(model = self.config.model, "starting Claude stream");

        let mut api_key_header = reqwest::header::HeaderValue::try_from(&self.config.api_key)
            .map_err(|e| LlmError::ConfigError(format!("Invalid API key characters: {e}")))?;
        api_key_header.set_sensitive(true);

        let response = self
            .client
            .post(url)
            .header("x-api-key", api_key_header)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Claude API error");

            if status.as_u16() == 429 {
                return Err(LlmError::RateLimitExceeded {
                    retry_after_secs: 60,
                });
            }

            return Err(LlmError::ApiRequestFailed(format!(
                "Status {status}: {body}"
            )));
        }

        let stream = async_stream::stream! {
            let mut bytes_stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut current_tool_id = String::new();
            let mut current_tool_name = String::new();
            let mut current_tool_json = String::new();

            while let Some(chunk) = bytes_stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield StreamEvent::Error { message: format!("Claude stream error: {e}") };
                        return;
                    },
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // Process complete SSE events (separated by a blank line).
                while let Some(event_end) = buffer.find("\n\n") {
                    let event_data = buffer[..event_end].to_string();
                    buffer = buffer[event_end.saturating_add(2)..].to_string();

                    for line in event_data.lines() {
                        let Some(data) = line.strip_prefix("data: ") else {
                            continue;
                        };

                        let Ok(event) = serde_json::from_str::<StreamingEvent>(data) else {
                            continue;
                        };

                        match event {
                            StreamingEvent::ContentBlockStart { content_block, .. } => {
                                if let ApiContentBlock::ToolUse { id, name, .. } = content_block {
                                    current_tool_id = id;
                                    current_tool_name = name.clone();
                                    current_tool_json.clear();
                                    yield StreamEvent::ToolUseStart { name };
                                }
                            },
                            StreamingEvent::ContentBlockDelta { delta, .. } => match delta {
                                Delta::TextDelta { text } => {
                                    yield StreamEvent::TextDelta { text };
                                },
                                Delta::InputJsonDelta { partial_json } => {
                                    current_tool_json.push_str(&partial_json);
                                },
                            },
                            StreamingEvent::ContentBlockStop { .. } => {
                                if !current_tool_name.is_empty() {
                                    let input = if current_tool_json.is_empty() {
                                        json!({})
                                    } else {
                                        serde_json::from_str(&current_tool_json)
                                            .unwrap_or_else(|_| json!({}))
                                    };
                                    yield StreamEvent::ToolUseComplete {
                                        tool_call: ToolCall::new(
                                            std::mem::take(&mut current_tool_id),
                                            std::mem::take(&mut current_tool_name),
                                            input,
                                        ),
                                    };
                                    current_tool_json.clear();
                                }
                            },
                            StreamingEvent::Error { error } => {
                                yield StreamEvent::Error {
                                    message: format!("Claude API error: {error}"),
                                };
                                return;
                            },
                            StreamingEvent::MessageStop => return,
                            _ => {},
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

// Streaming event wire types.

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[allow(dead_code)] // fields required for deserialization
enum StreamingEvent {
    MessageStart {
        message: Value,
    },
    ContentBlockStart {
        index: usize,
        content_block: ApiContentBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: Delta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        delta: Value,
        usage: Option<Value>,
    },
    MessageStop,
    Ping,
    Error {
        error: Value,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_api_key() {
        let client = ClaudeClient::new(ProviderConfig::new("", "claude-sonnet-4-20250514"));
        let err = client.stream_round("", &[], &[]).await.err().unwrap();
        assert!(matches!(err, LlmError::ApiKeyNotConfigured { .. }));
        assert!(!client.is_available().await);
    }

    #[tokio::test]
    async fn test_invalid_api_key_characters() {
        let client = ClaudeClient::new(ProviderConfig::new("bad\nkey", "claude-sonnet-4-20250514"));
        let err = client.stream_round("", &[], &[]).await.err().unwrap();
        assert!(
            matches!(err, LlmError::ConfigError(ref msg) if msg.contains("Invalid API key characters"))
        );
    }

    #[test]
    fn test_build_request() {
        let client = ClaudeClient::new(
            ProviderConfig::new("test-key", "claude-sonnet-4-20250514").max_tokens(1024),
        );
        let messages = vec![Message::user("Hello")];
        let request = client.build_request("You are helpful", &messages, &[]);

        assert_eq!(request["model"], "claude-sonnet-4-20250514");
        assert_eq!(request["max_tokens"], 1024);
        assert_eq!(request["system"], "You are helpful");
        assert!(request["stream"].as_bool().unwrap());
        assert!(request.get("tools").is_none());
    }

    #[test]
    fn test_convert_text_message() {
        let converted = ClaudeClient::convert_message(&Message::user("Hello"));
        assert_eq!(converted["role"], "user");
        assert_eq!(converted["content"], "Hello");
    }

    #[test]
    fn test_convert_block_message() {
        let msg = Message::assistant_blocks(vec![
            ContentBlock::Text { text: "checking".into() },
            ContentBlock::ToolUse {
                id: "tu_1".into(),
                name: "get_weather".into(),
                input: json!({"location": "Lisbon"}),
            },
        ]);
        let converted = ClaudeClient::convert_message(&msg);
        assert_eq!(converted["role"], "assistant");
        assert_eq!(converted["content"][0]["type"], "text");
        assert_eq!(converted["content"][1]["type"], "tool_use");
        assert_eq!(converted["content"][1]["input"]["location"], "Lisbon");
    }

    #[test]
    fn test_convert_image_block_wraps_source() {
        let msg = Message {
            role: Role::User,
            content: MessageContent::Blocks(vec![ContentBlock::Image {
                media_type: "image/png".into(),
                data: "aGVsbG8=".into(),
            }]),
        };
        let converted = ClaudeClient::convert_message(&msg);
        assert_eq!(converted["content"][0]["type"], "image");
        assert_eq!(converted["content"][0]["source"]["type"], "base64");
        assert_eq!(converted["content"][0]["source"]["media_type"], "image/png");
    }

    #[test]
    fn test_streaming_event_parsing() {
        let data = r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"hi"}}"#;
        let event: StreamingEvent = serde_json::from_str(data).unwrap();
        assert!(matches!(
            event,
            StreamingEvent::ContentBlockDelta { delta: Delta::TextDelta { .. }, .. }
        ));

        let data = r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"tu_1","name":"echo","input":{}}}"#;
        let event: StreamingEvent = serde_json::from_str(data).unwrap();
        assert!(matches!(event, StreamingEvent::ContentBlockStart { .. }));
    }
}
