//! Text generation for reply drafts.
//!
//! Supports:
//! - **Anthropic**: Direct API access via rig-core
//! - **OpenAI**: Direct API access via rig-core
//!
//! Drafting code depends on the [`TextGenerator`] trait; [`create_generator`]
//! wires a rig completion model behind it.

use std::sync::Arc;

use async_trait::async_trait;
use rig::agent::AgentBuilder;
use rig::client::CompletionClient;
use rig::completion::{CompletionModel, Prompt};
use secrecy::{ExposeSecret, SecretString};

use crate::config::{env_or, optional_var};
use crate::error::{ConfigError, LlmError};

/// Sampling temperature for reply drafts.
pub const DRAFT_TEMPERATURE: f64 = 0.4;

const DRAFT_MAX_TOKENS: u64 = 1024;

/// Produces text from a single prompt.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Model identifier, for logging.
    fn model_name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Anthropic,
    OpenAi,
}

impl std::str::FromStr for LlmBackend {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "anthropic" => Ok(Self::Anthropic),
            "openai" => Ok(Self::OpenAi),
            other => Err(format!("Unknown LLM backend: {other}")),
        }
    }
}

/// Configuration for creating a text generator.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: SecretString,
    pub model: String,
}

impl LlmConfig {
    /// Build from `LLM_BACKEND` (default `openai`), `LLM_MODEL`, and the
    /// backend's API key (`OPENAI_API_KEY` or `ANTHROPIC_API_KEY`).
    pub fn from_env() -> Result<Self, ConfigError> {
        let backend: LlmBackend = env_or("LLM_BACKEND", "openai")
            .parse()
            .map_err(|message| ConfigError::InvalidValue {
                key: "LLM_BACKEND".into(),
                message,
            })?;

        let (key_var, default_model) = match backend {
            LlmBackend::Anthropic => ("ANTHROPIC_API_KEY", "claude-3-5-sonnet-latest"),
            LlmBackend::OpenAi => ("OPENAI_API_KEY", "gpt-4o"),
        };

        let api_key = optional_var(key_var)
            .ok_or_else(|| ConfigError::MissingEnvVar(key_var.to_string()))?;

        Ok(Self {
            backend,
            api_key: SecretString::from(api_key),
            model: env_or("LLM_MODEL", default_model),
        })
    }
}

/// A rig completion model used as a one-shot prompt agent.
pub struct RigGenerator<M> {
    model: M,
    model_name: String,
    provider: &'static str,
}

impl<M> RigGenerator<M> {
    pub fn new(model: M, model_name: &str, provider: &'static str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
            provider,
        }
    }
}

#[async_trait]
impl<M> TextGenerator for RigGenerator<M>
where
    M: CompletionModel + Send + Sync + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        let agent = AgentBuilder::new(self.model.clone())
            .temperature(DRAFT_TEMPERATURE)
            .max_tokens(DRAFT_MAX_TOKENS)
            .build();

        tracing::debug!(
            provider = self.provider,
            model = %self.model_name,
            prompt_length = prompt.len(),
            "Requesting draft"
        );

        let response = agent
            .prompt(prompt)
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: self.provider.to_string(),
                reason: e.to_string(),
            })?;

        let text = response.trim();
        if text.is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: self.provider.to_string(),
                reason: "empty completion".into(),
            });
        }
        Ok(text.to_string())
    }
}

/// Create a text generator from configuration.
pub fn create_generator(config: &LlmConfig) -> Result<Arc<dyn TextGenerator>, LlmError> {
    match config.backend {
        LlmBackend::Anthropic => create_anthropic_generator(config),
        LlmBackend::OpenAi => create_openai_generator(config),
    }
}

fn create_anthropic_generator(config: &LlmConfig) -> Result<Arc<dyn TextGenerator>, LlmError> {
    use rig::providers::anthropic;

    let client: rig::client::Client<anthropic::client::AnthropicExt> =
        anthropic::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "anthropic".to_string(),
                reason: format!("Failed to create Anthropic client: {}", e),
            }
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!("Using Anthropic (model: {})", config.model);
    Ok(Arc::new(RigGenerator::new(model, &config.model, "anthropic")))
}

fn create_openai_generator(config: &LlmConfig) -> Result<Arc<dyn TextGenerator>, LlmError> {
    use rig::providers::openai;

    let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
        openai::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "openai".to_string(),
                reason: format!("Failed to create OpenAI client: {}", e),
            }
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!("Using OpenAI (model: {})", config.model);
    Ok(Arc::new(RigGenerator::new(model, &config.model, "openai")))
}
