//! LLM router — selects a provider per request and forwards its stream.

use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info};

use valet_config::Settings;

use crate::client::{
    EventStream, LlmClient, ProviderConfig, ToolExecutor, approx_tokens, stream_with_tool_loop,
};
use crate::error::{LlmError, LlmResult};
use crate::types::{Message, Provider, StreamEvent, ToolDefinition};
use crate::{BedrockClient, ClaudeClient, OpenAiCompatClient};

/// Known vision-capable model families (substring match).
const VISION_MODELS: &[&str] = &[
    "claude",
    "gpt-4o",
    "gpt-4-turbo",
    "gpt-4-vision",
    "llava",
    "bakllava",
    "moondream",
    "qwen-vl",
    "qwen2-vl",
    "cogvlm",
    "minicpm-v",
];

/// Routes requests between providers based on configuration.
///
/// Clients are created lazily and cached per `provider/model` pair.
pub struct LlmRouter {
    settings: Settings,
    clients: RwLock<HashMap<String, Arc<dyn LlmClient>>>,
    ollama_available: OnceCell<bool>,
}

impl LlmRouter {
    /// Create a new router.
    #[must_use]
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            clients: RwLock::new(HashMap::new()),
            ollama_available: OnceCell::new(),
        }
    }

    /// The configured default provider and its model.
    #[must_use]
    pub fn default_provider(&self) -> (Provider, String) {
        match self.settings.default_provider.as_str() {
            "openai" if self.settings.openai_enabled => {
                (Provider::OpenAi, self.settings.openai_model.clone())
            },
            "ollama" if self.settings.ollama_enabled => {
                (Provider::Ollama, self.settings.ollama_model.clone())
            },
            "bedrock" if self.settings.bedrock_enabled => {
                (Provider::Bedrock, self.settings.bedrock_model.clone())
            },
            _ => (Provider::Claude, self.settings.model.clone()),
        }
    }

    fn build_client(&self, provider: Provider, model: &str) -> Arc<dyn LlmClient> {
        let s = &self.settings;
        match provider {
            Provider::Claude => Arc::new(ClaudeClient::new(
                ProviderConfig::new(s.anthropic_api_key.clone(), model)
                    .max_tokens(s.max_tokens),
            )),
            Provider::OpenAi => Arc::new(OpenAiCompatClient::openai(
                ProviderConfig::new(s.openai_api_key.clone(), model).max_tokens(s.max_tokens),
            )),
            Provider::Ollama => Arc::new(OpenAiCompatClient::ollama(
                ProviderConfig::new("", model)
                    .max_tokens(s.max_tokens)
                    .base_url(s.ollama_base_url.clone()),
            )),
            Provider::Bedrock => Arc::new(BedrockClient::new(
                ProviderConfig::new("", model)
                    .max_tokens(s.max_tokens)
                    .region(s.bedrock_region.clone()),
            )),
        }
    }

    /// Get or create the cached client for a provider/model pair.
    pub async fn client_for(&self, provider: Provider, model: &str) -> Arc<dyn LlmClient> {
        let key = format!("{provider}/{model}");
        if let Some(existing) = self.clients.read().await.get(&key) {
            return Arc::clone(existing);
        }

        let mut clients = self.clients.write().await;
        // Re-check under the write lock.
        if let Some(existing) = clients.get(&key) {
            return Arc::clone(existing);
        }
        let client = self.build_client(provider, model);
        clients.insert(key.clone(), Arc::clone(&client));
        info!(client = %key, "created LLM client");
        client
    }

    /// Install a pre-built client for a provider/model pair. Used by
    /// embedders (and tests) that bring their own adapter.
    pub async fn register_client(
        &self,
        provider: Provider,
        model: &str,
        client: Arc<dyn LlmClient>,
    ) {
        self.clients
            .write()
            .await
            .insert(format!("{provider}/{model}"), client);
    }

    /// Resolve a `provider/model` reference (bare names use the default
    /// provider).
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::UnknownProvider`] for an unrecognised prefix.
    pub async fn client_for_model(&self, model_ref: &str) -> LlmResult<Arc<dyn LlmClient>> {
        let (provider, model) = if let Some((prefix, name)) = model_ref.split_once('/') {
            let provider =
                Provider::from_key(prefix).ok_or_else(|| LlmError::UnknownProvider {
                    provider: prefix.to_string(),
                    model: model_ref.to_string(),
                })?;
            (provider, name.to_string())
        } else {
            let (provider, _) = self.default_provider();
            (provider, model_ref.to_string())
        };

        Ok(self.client_for(provider, &model).await)
    }

    async fn ollama_reachable(&self) -> bool {
        *self
            .ollama_available
            .get_or_init(|| async {
                let client = self.build_client(Provider::Ollama, &self.settings.ollama_model);
                let available = client.is_available().await;
                if available {
                    info!(url = %self.settings.ollama_base_url, "Ollama is available");
                } else {
                    debug!("Ollama is not available");
                }
                available
            })
            .await
    }

    /// Whether a simple query should route to the local model: no tools and
    /// a prompt under the configured token threshold.
    fn is_simple_query(&self, messages: &[Message], tools: &[ToolDefinition]) -> bool {
        if !tools.is_empty() {
            return false;
        }
        approx_tokens(messages) <= self.settings.local_model_threshold_tokens
    }

    /// Check if a model name is likely vision-capable.
    #[must_use]
    pub fn supports_vision(model: &str) -> bool {
        let lower = model.to_lowercase();
        VISION_MODELS.iter().any(|v| lower.contains(v))
    }

    /// Check if the current default model supports vision, honouring the
    /// configured override.
    #[must_use]
    pub fn default_model_supports_vision(&self) -> bool {
        if let Some(vision) = self.settings.vision {
            return vision;
        }
        let (_, model) = self.default_provider();
        Self::supports_vision(&model)
    }

    /// Check if any provider is configured.
    pub async fn is_available(&self) -> bool {
        if !self.settings.anthropic_api_key.is_empty() {
            return true;
        }
        if self.settings.openai_enabled && !self.settings.openai_api_key.is_empty() {
            return true;
        }
        if self.settings.bedrock_enabled {
            return true;
        }
        self.settings.ollama_enabled && self.ollama_reachable().await
    }

    /// Select a client and stream the full tool-use loop.
    ///
    /// Yields one `RoutingInfo` event, then forwards every loop event
    /// verbatim. Selection order: explicit `model_override`, then the
    /// simple-query heuristic (local model), then the configured default.
    pub async fn stream_with_tool_loop(
        &self,
        system: String,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        executor: Option<ToolExecutor>,
        max_tool_rounds: usize,
        model_override: Option<&str>,
    ) -> EventStream {
        let client = if let Some(model_ref) = model_override {
            match self.client_for_model(model_ref).await {
                Ok(c) => c,
                Err(e) => return error_stream(&e),
            }
        } else {
            let use_local = self.settings.ollama_enabled
                && self.settings.default_provider != "ollama"
                && self.is_simple_query(&messages, &tools)
                && self.ollama_reachable().await;

            if use_local {
                self.client_for(Provider::Ollama, &self.settings.ollama_model)
                    .await
            } else {
                let (provider, model) = self.default_provider();
                self.client_for(provider, &model).await
            }
        };

        let provider = client.provider();
        let model = client.model().to_string();
        debug!(provider = %provider, model = %model, "routing request");

        let mut inner = stream_with_tool_loop(
            client,
            system,
            messages,
            tools,
            executor,
            max_tool_rounds,
        );

        Box::pin(async_stream::stream! {
            yield StreamEvent::RoutingInfo { provider, model };
            while let Some(event) = inner.next().await {
                yield event;
            }
        })
    }

    /// Close all cached clients.
    pub async fn close(&self) {
        let clients: Vec<Arc<dyn LlmClient>> =
            self.clients.write().await.drain().map(|(_, c)| c).collect();
        for client in clients {
            client.close().await;
        }
    }
}

fn error_stream(error: &LlmError) -> EventStream {
    let message = error.to_string();
    Box::pin(futures::stream::once(async move {
        StreamEvent::Error { message }
    }))
}
