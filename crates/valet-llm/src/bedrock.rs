//! AWS Bedrock provider — Converse streaming wire format.
//!
//! Canonical blocks map onto Converse content blocks; images are re-encoded
//! from base64 to raw bytes, tool results carry a success/error status, and
//! tool inputs travel as structured documents.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_bedrockruntime::Client as RuntimeClient;
use aws_sdk_bedrockruntime::error::DisplayErrorContext;
use aws_sdk_bedrockruntime::types::{
    ContentBlock as AwsContentBlock, ContentBlockDelta, ContentBlockStart, ConversationRole,
    ConverseStreamOutput as ConverseEvent, ImageBlock, ImageFormat, ImageSource,
    InferenceConfiguration, Message as AwsMessage, SystemContentBlock, Tool, ToolConfiguration,
    ToolInputSchema, ToolResultBlock, ToolResultContentBlock, ToolResultStatus, ToolSpecification,
    ToolUseBlock,
};
use aws_smithy_types::{Blob, Document, Number};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::client::{EventStream, LlmClient, ProviderConfig};
use crate::error::{LlmError, LlmResult};
use crate::types::{
    ContentBlock, Message, MessageContent, Provider, Role, StreamEvent, ToolCall, ToolDefinition,
};

const DEFAULT_REGION: &str = "us-east-1";

/// Bedrock provider client.
pub struct BedrockClient {
    config: ProviderConfig,
    client: OnceCell<RuntimeClient>,
}

impl BedrockClient {
    /// Create a new Bedrock client. The underlying AWS client is built
    /// lazily on first use (credential chain resolution is async).
    #[must_use]
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            client: OnceCell::new(),
        }
    }

    async fn runtime_client(&self) -> &RuntimeClient {
        let region_name = self
            .config
            .region
            .clone()
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        self.client
            .get_or_init(|| async move {
                let shared = aws_config::defaults(BehaviorVersion::latest())
                    .region(aws_config::Region::new(region_name))
                    .load()
                    .await;
                RuntimeClient::new(&shared)
            })
            .await
    }

    /// Convert a canonical message to Converse format.
    fn convert_message(message: &Message) -> LlmResult<AwsMessage> {
        let role = match message.role {
            Role::User => ConversationRole::User,
            Role::Assistant => ConversationRole::Assistant,
        };

        let mut builder = AwsMessage::builder().role(role);
        match &message.content {
            MessageContent::Text(text) => {
                builder = builder.content(AwsContentBlock::Text(text.clone()));
            },
            MessageContent::Blocks(blocks) => {
                for block in blocks {
                    builder = builder.content(Self::convert_block(block)?);
                }
            },
        }

        builder
            .build()
            .map_err(|e| LlmError::ApiRequestFailed(format!("invalid Bedrock message: {e}")))
    }

    fn convert_block(block: &ContentBlock) -> LlmResult<AwsContentBlock> {
        match block {
            ContentBlock::Text { text } => Ok(AwsContentBlock::Text(text.clone())),
            ContentBlock::ToolUse { id, name, input } => {
                let tool_use = ToolUseBlock::builder()
                    .tool_use_id(id)
                    .name(name)
                    .input(json_to_document(input))
                    .build()
                    .map_err(|e| {
                        LlmError::ApiRequestFailed(format!("invalid tool_use block: {e}"))
                    })?;
                Ok(AwsContentBlock::ToolUse(tool_use))
            },
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                let status = if *is_error {
                    ToolResultStatus::Error
                } else {
                    ToolResultStatus::Success
                };
                let result = ToolResultBlock::builder()
                    .tool_use_id(tool_use_id)
                    .content(ToolResultContentBlock::Text(content.clone()))
                    .status(status)
                    .build()
                    .map_err(|e| {
                        LlmError::ApiRequestFailed(format!("invalid tool_result block: {e}"))
                    })?;
                Ok(AwsContentBlock::ToolResult(result))
            },
            ContentBlock::Image { media_type, data } => {
                let bytes = BASE64.decode(data).map_err(|e| {
                    LlmError::ApiRequestFailed(format!("invalid base64 image data: {e}"))
                })?;
                let image = ImageBlock::builder()
                    .format(image_format(media_type))
                    .source(ImageSource::Bytes(Blob::new(bytes)))
                    .build()
                    .map_err(|e| {
                        LlmError::ApiRequestFailed(format!("invalid image block: {e}"))
                    })?;
                Ok(AwsContentBlock::Image(image))
            },
        }
    }

    fn convert_tools(tools: &[ToolDefinition]) -> LlmResult<ToolConfiguration> {
        let mut builder = ToolConfiguration::builder();
        for tool in tools {
            let spec = ToolSpecification::builder()
                .name(&tool.name)
                .description(&tool.description)
                .input_schema(ToolInputSchema::Json(json_to_document(&tool.input_schema)))
                .build()
                .map_err(|e| {
                    LlmError::ApiRequestFailed(format!("invalid tool spec '{}': {e}", tool.name))
                })?;
            builder = builder.tools(Tool::ToolSpec(spec));
        }
        builder
            .build()
            .map_err(|e| LlmError::ApiRequestFailed(format!("invalid tool config: {e}")))
    }
}

/// Map a MIME type to a Bedrock image format, defaulting to PNG.
fn image_format(media_type: &str) -> ImageFormat {
    match media_type.split('/').next_back().unwrap_or("png") {
        "jpeg" | "jpg" => ImageFormat::Jpeg,
        "gif" => ImageFormat::Gif,
        "webp" => ImageFormat::Webp,
        _ => ImageFormat::Png,
    }
}

/// Convert a JSON value to a smithy document.
fn json_to_document(value: &Value) -> Document {
    match value {
        Value::Null => Document::Null,
        Value::Bool(b) => Document::Bool(*b),
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                Document::Number(Number::PosInt(u))
            } else if let Some(i) = n.as_i64() {
                Document::Number(Number::NegInt(i))
            } else {
                Document::Number(Number::Float(n.as_f64().unwrap_or(0.0)))
            }
        },
        Value::String(s) => Document::String(s.clone()),
        Value::Array(items) => Document::Array(items.iter().map(json_to_document).collect()),
        Value::Object(map) => Document::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), json_to_document(v)))
                .collect(),
        ),
    }
}

#[async_trait]
impl LlmClient for BedrockClient {
    fn provider(&self) -> Provider {
        Provider::Bedrock
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn is_available(&self) -> bool {
        // Credential resolution happens at call time via the AWS chain.
        true
    }

    #[allow(clippy::too_many_lines)]
    async fn stream_round(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> LlmResult<EventStream> {
        let client = self.runtime_client().await.clone();

        debug!(model = self.config.model, "starting Bedrock converse stream");

        let max_tokens = i32::try_from(self.config.max_tokens).unwrap_or(i32::MAX);
        let mut request = client
            .converse_stream()
            .model_id(&self.config.model)
            .inference_config(
                InferenceConfiguration::builder()
                    .max_tokens(max_tokens)
                    .build(),
            );

        if !system.is_empty() {
            request = request.system(SystemContentBlock::Text(system.to_string()));
        }
        for message in messages {
            request = request.messages(Self::convert_message(message)?);
        }
        if !tools.is_empty() {
            request = request.tool_config(Self::convert_tools(tools)?);
        }

        let output = request.send().await.map_err(|e| {
            LlmError::ApiRequestFailed(format!("Bedrock error: {}", DisplayErrorContext(&e)))
        })?;
        let mut events = output.stream;

        let stream = async_stream::stream! {
            let mut current_tool_id = String::new();
            let mut current_tool_name = String::new();
            let mut current_tool_json = String::new();

            loop {
                let event = match events.recv().await {
                    Ok(Some(ev)) => ev,
                    Ok(None) => break,
                    Err(e) => {
                        yield StreamEvent::Error {
                            message: format!(
                                "Bedrock stream error: {}",
                                DisplayErrorContext(&e)
                            ),
                        };
                        return;
                    },
                };

                match event {
                    ConverseEvent::ContentBlockStart(ev) => {
                        if let Some(ContentBlockStart::ToolUse(tool_use)) = ev.start() {
                            current_tool_id = tool_use.tool_use_id().to_string();
                            current_tool_name = tool_use.name().to_string();
                            current_tool_json.clear();
                            yield StreamEvent::ToolUseStart {
                                name: current_tool_name.clone(),
                            };
                        }
                    },
                    ConverseEvent::ContentBlockDelta(ev) => match ev.delta() {
                        Some(ContentBlockDelta::Text(text)) => {
                            yield StreamEvent::TextDelta { text: text.clone() };
                        },
                        Some(ContentBlockDelta::ToolUse(delta)) => {
                            current_tool_json.push_str(delta.input());
                        },
                        _ => {},
                    },
                    ConverseEvent::ContentBlockStop(_) => {
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
                    ConverseEvent::MessageStop(_) => break,
                    _ => {},
                }
            }
        };

        Ok(Box::pin(stream))
    }
}
