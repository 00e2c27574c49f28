//! Ollama LLM Provider
//!
//! Implementation of `LlmProvider` for local Ollama inference.

use async_trait::async_trait;
use codeact_core::{
    error::{AgentError, Result},
    message::{Message, Role},
    provider::{Completion, FinishReason, GenerationOptions, LlmProvider, ModelInfo, ProviderInfo},
};
use ollama_rs::{
    Ollama,
    generation::chat::{ChatMessage, MessageRole, request::ChatMessageRequest},
    models::ModelOptions,
};

const DEFAULT_HOST: &str = "http://localhost";
const DEFAULT_PORT: u16 = 11434;

/// Where the Ollama daemon listens
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OllamaConfig {
    /// Scheme and host, without port
    pub host: String,

    pub port: u16,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
        }
    }
}

impl OllamaConfig {
    /// Read `OLLAMA_HOST` and `OLLAMA_PORT`
    ///
    /// `OLLAMA_HOST` may carry its own port (`http://gpu-box:11500`) the way
    /// the `ollama` CLI accepts it; `OLLAMA_PORT` wins when both are set.
    pub fn from_env() -> Self {
        let mut config = std::env::var("OLLAMA_HOST")
            .map(|h| Self::parse_host(&h))
            .unwrap_or_default();
        if let Some(port) = std::env::var("OLLAMA_PORT").ok().and_then(|p| p.parse().ok()) {
            config.port = port;
        }
        config
    }

    /// Split `[scheme://]host[:port]` into host URL and port
    pub fn parse_host(raw: &str) -> Self {
        let raw = raw.trim().trim_end_matches('/');
        if raw.is_empty() {
            return Self::default();
        }
        let (scheme, rest) = raw.split_once("://").unwrap_or(("http", raw));

        match rest.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => match port.parse() {
                Ok(port) => Self {
                    host: format!("{scheme}://{host}"),
                    port,
                },
                Err(_) => Self {
                    host: format!("{scheme}://{rest}"),
                    port: DEFAULT_PORT,
                },
            },
            _ => Self {
                host: format!("{scheme}://{rest}"),
                port: DEFAULT_PORT,
            },
        }
    }

    pub fn url(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Ollama LLM provider, talking to the daemon's chat endpoint
pub struct OllamaProvider {
    client: Ollama,
    config: OllamaConfig,
}

impl OllamaProvider {
    pub fn from_config(config: OllamaConfig) -> Self {
        Self {
            client: Ollama::new(config.host.clone(), config.port),
            config,
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Self {
        Self::from_config(OllamaConfig::from_env())
    }

    pub const fn config(&self) -> &OllamaConfig {
        &self.config
    }

    /// Convert agent messages to Ollama format
    fn convert_messages(messages: &[Message]) -> Vec<ChatMessage> {
        messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::System => MessageRole::System,
                    Role::User => MessageRole::User,
                    Role::Assistant => MessageRole::Assistant,
                };
                ChatMessage::new(role, m.content.clone())
            })
            .collect()
    }

    /// Build Ollama model options
    #[allow(clippy::cast_possible_wrap)]
    fn build_options(opts: &GenerationOptions) -> ModelOptions {
        ModelOptions::default()
            .temperature(opts.temperature)
            .top_p(opts.top_p)
            .num_predict(opts.max_tokens as i32)
            .stop(opts.stop_sequences.clone())
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn info(&self) -> Result<ProviderInfo> {
        let models = self.list_models().await.unwrap_or_default();

        Ok(ProviderInfo {
            name: format!("Ollama ({})", self.config.url()),
            version: None,
            models,
        })
    }

    async fn health_check(&self) -> Result<bool> {
        match self.client.list_local_models().await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!("Ollama health check failed: {}", e);
                Ok(false)
            }
        }
    }

    async fn complete(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<Completion> {
        let request = ChatMessageRequest::new(options.model.clone(), Self::convert_messages(messages))
            .options(Self::build_options(options));

        tracing::debug!(model = %options.model, messages = messages.len(), "Ollama chat request");

        let response = self
            .client
            .send_chat_messages(request)
            .await
            .map_err(|e| classify_error(&e.to_string()))?;

        Ok(Completion {
            content: response.message.content,
            model: options.model.clone(),
            usage: None,
            truncated: false,
            finish_reason: Some(FinishReason::Stop),
        })
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let models = self
            .client
            .list_local_models()
            .await
            .map_err(|e| classify_error(&e.to_string()))?;

        Ok(models
            .into_iter()
            .map(|m| ModelInfo {
                id: m.name.clone(),
                name: m.name,
                context_length: None,
            })
            .collect())
    }
}

/// Map an `ollama-rs` error onto the agent's retry classes
///
/// The crate reports transport and API failures through one error type, so
/// the split is made on the message.
fn classify_error(message: &str) -> AgentError {
    let lower = message.to_lowercase();
    if lower.contains("not found") && lower.contains("model") {
        AgentError::Config(format!("Ollama model is not pulled: {message}"))
    } else if ["connect", "error sending request", "timed out", "connection"]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        AgentError::ProviderUnavailable(format!("Ollama is not reachable: {message}"))
    } else {
        AgentError::Provider(message.to_string())
    }
}
