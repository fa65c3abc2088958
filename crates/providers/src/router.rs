//! Model routing and provider construction.
//!
//! Which model handles a step is a pluggable [`ModelRouter`] strategy fed
//! with a [`TaskSignal`]. The invoker asks the router before every call, so a
//! different strategy changes model choice without touching the loop.

use std::sync::Arc;
use std::time::Duration;

use runwarden_config::AppConfig;
use runwarden_core::error::ProviderError;
use runwarden_core::provider::Provider;

use crate::openai_compat::OpenAiCompatProvider;

/// What the next model call is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskSignal {
    /// Choosing the next action from the user message and history.
    Draft,
    /// Producing an answer from tool observations already gathered.
    Synthesize,
    /// Checking or forcing a best-effort answer.
    Verify,
}

/// Chooses a model for a step.
pub trait ModelRouter: Send + Sync {
    fn select(&self, signal: TaskSignal) -> String;
}

/// Routes verification to a dedicated model when one is configured and
/// everything else to the default model.
#[derive(Debug, Clone)]
pub struct IntentRouter {
    default_model: String,
    verification_model: Option<String>,
}

impl IntentRouter {
    pub fn new(default_model: impl Into<String>) -> Self {
        Self {
            default_model: default_model.into(),
            verification_model: None,
        }
    }

    pub fn with_verification_model(mut self, model: impl Into<String>) -> Self {
        self.verification_model = Some(model.into());
        self
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            default_model: config.default_model.clone(),
            verification_model: config.verification_model.clone(),
        }
    }
}

impl ModelRouter for IntentRouter {
    fn select(&self, signal: TaskSignal) -> String {
        match (signal, &self.verification_model) {
            (TaskSignal::Verify, Some(model)) => model.clone(),
            _ => self.default_model.clone(),
        }
    }
}

/// Build the configured provider.
///
/// Every supported backend speaks the OpenAI chat-completions protocol; the
/// provider name only picks the default base URL.
pub fn build_provider(config: &AppConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let name = config.default_provider.as_str();
    let api_key = config.api_key.clone().unwrap_or_default();

    if api_key.is_empty() && requires_api_key(name) {
        return Err(ProviderError::NotConfigured(format!(
            "no API key for provider '{name}'; set RUNWARDEN_API_KEY or api_key in config.toml"
        )));
    }

    let base_url = config
        .api_url
        .clone()
        .unwrap_or_else(|| default_base_url(name));

    let provider = OpenAiCompatProvider::new(
        name,
        base_url,
        api_key,
        Duration::from_secs(config.retry.request_timeout_seconds),
    )?;
    Ok(Arc::new(provider))
}

fn requires_api_key(provider_name: &str) -> bool {
    !matches!(
        provider_name,
        "ollama" | "vllm" | "llamacpp" | "llama.cpp" | "custom"
    )
}

/// Get the default base URL for well-known providers.
pub fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "openai" => "https://api.openai.com/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "deepseek" => "https://api.deepseek.com/v1".into(),
        "groq" => "https://api.groq.com/openai/v1".into(),
        "together" => "https://api.together.xyz/v1".into(),
        "fireworks" => "https://api.fireworks.ai/inference/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        "llamacpp" | "llama.cpp" => "http://localhost:8080/v1".into(),
        _ => format!("https://{provider_name}.api.example.com/v1"),
    }
}
