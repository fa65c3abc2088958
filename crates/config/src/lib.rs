//! Configuration loading, validation, and management for runwarden.
//!
//! Loads configuration from `~/.runwarden/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.runwarden/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the model provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Override the provider base URL (any OpenAI-compatible endpoint)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Model provider: "openrouter", "openai", "ollama" or "custom"
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Model used for drafting decisions
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Model used for verification passes; falls back to `default_model`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_model: Option<String>,

    /// Models tried in order after the routed model is exhausted
    #[serde(default)]
    pub fallback_models: Vec<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Max tokens per model response
    #[serde(default = "default_max_response_tokens")]
    pub max_response_tokens: u32,

    /// Run budget ceilings
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Tool pipeline settings
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Argument guardrails
    #[serde(default)]
    pub guardrails: GuardrailConfig,

    /// Provider retry and output repair
    #[serde(default)]
    pub retry: RetryConfig,

    /// Agent loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Memory settings
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Request content policy
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Custom model pricing (USD per million tokens)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pricing: Vec<PricingOverride>,
}

fn default_provider() -> String {
    "openrouter".into()
}
fn default_model() -> String {
    "openai/gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_response_tokens() -> u32 {
    2048
}
fn default_true() -> bool {
    true
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("verification_model", &self.verification_model)
            .field("fallback_models", &self.fallback_models)
            .field("temperature", &self.temperature)
            .field("max_response_tokens", &self.max_response_tokens)
            .field("budget", &self.budget)
            .field("tools", &self.tools)
            .field("guardrails", &self.guardrails)
            .field("retry", &self.retry)
            .field("agent", &self.agent)
            .field("memory", &self.memory)
            .field("policy", &self.policy)
            .field("pricing", &self.pricing)
            .finish()
    }
}

/// Per-run consumption ceilings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: u32,

    #[serde(default = "default_max_time_seconds")]
    pub max_time_seconds: f64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u64,

    /// USD
    #[serde(default = "default_max_cost")]
    pub max_cost: f64,
}

fn default_max_tool_calls() -> u32 {
    15
}
fn default_max_time_seconds() -> f64 {
    180.0
}
fn default_max_tokens() -> u64 {
    64_000
}
fn default_max_cost() -> f64 {
    5.0
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_tool_calls: default_max_tool_calls(),
            max_time_seconds: default_max_time_seconds(),
            max_tokens: default_max_tokens(),
            max_cost: default_max_cost(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Allowed tool names. Empty or `"*"` allows every registered tool.
    #[serde(default = "default_allowed_tools")]
    pub allowed_tools: Vec<String>,

    /// Per-call execution timeout
    #[serde(default = "default_tool_timeout")]
    pub timeout_seconds: u64,

    /// Rendered output longer than this is cut and marked
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,

    /// Scoped temp area; defaults to `<system temp>/runwarden`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<PathBuf>,
}

fn default_allowed_tools() -> Vec<String> {
    vec!["*".into()]
}
fn default_tool_timeout() -> u64 {
    15
}
fn default_max_output_chars() -> usize {
    12_000
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            allowed_tools: default_allowed_tools(),
            timeout_seconds: default_tool_timeout(),
            max_output_chars: default_max_output_chars(),
            scratch_dir: None,
        }
    }
}

impl ToolsConfig {
    /// The configured scratch area, or the default under the system temp dir.
    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("runwarden"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Serialized arguments longer than this are denied
    #[serde(default = "default_max_argument_chars")]
    pub max_argument_chars: usize,

    /// Additional regex patterns denied in code and command arguments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_blocked_patterns: Vec<String>,
}

fn default_max_argument_chars() -> usize {
    10_000
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_argument_chars: default_max_argument_chars(),
            extra_blocked_patterns: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per model for transient provider failures
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Re-asks with a stricter prompt after unparseable output
    #[serde(default = "default_max_repair_attempts")]
    pub max_repair_attempts: u32,

    /// Hard timeout on one provider round trip
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_backoff_max_ms() -> u64 {
    8_000
}
fn default_max_repair_attempts() -> u32 {
    2
}
fn default_request_timeout() -> u64 {
    60
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            max_repair_attempts: default_max_repair_attempts(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_name")]
    pub name: String,

    /// Replace the built-in system prompt entirely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Safety cap on decide iterations per run
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Clarifying questions in a row before an answer is forced
    #[serde(default = "default_max_consecutive_clarifications")]
    pub max_consecutive_clarifications: u32,

    /// Token budget of one assembled context
    #[serde(default = "default_context_max_tokens")]
    pub context_max_tokens: usize,

    /// Review final answers before returning them
    #[serde(default = "default_true")]
    pub quality_check: bool,

    /// Times a final answer may be sent back for revision in one run
    #[serde(default = "default_max_quality_retries")]
    pub max_quality_retries: u32,
}

fn default_agent_name() -> String {
    "runwarden".into()
}
fn default_max_iterations() -> u32 {
    50
}
fn default_max_consecutive_clarifications() -> u32 {
    2
}
fn default_context_max_tokens() -> usize {
    16_000
}
fn default_max_quality_retries() -> u32 {
    2
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            system_prompt: None,
            max_iterations: default_max_iterations(),
            max_consecutive_clarifications: default_max_consecutive_clarifications(),
            context_max_tokens: default_context_max_tokens(),
            quality_check: true,
            max_quality_retries: default_max_quality_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_short_term_max_turns")]
    pub short_term_max_turns: usize,

    #[serde(default = "default_true")]
    pub long_term_enabled: bool,

    #[serde(default = "default_retrieval_top_k")]
    pub retrieval_top_k: usize,

    /// Facts kept per session; the oldest are evicted past this
    #[serde(default = "default_long_term_max_facts")]
    pub long_term_max_facts: usize,

    /// Tool output shorter than this is never written to long-term memory
    #[serde(default = "default_min_fact_chars")]
    pub min_fact_chars: usize,
}

fn default_short_term_max_turns() -> usize {
    20
}
fn default_retrieval_top_k() -> usize {
    5
}
fn default_long_term_max_facts() -> usize {
    500
}
fn default_min_fact_chars() -> usize {
    20
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            short_term_max_turns: default_short_term_max_turns(),
            long_term_enabled: true,
            retrieval_top_k: default_retrieval_top_k(),
            long_term_max_facts: default_long_term_max_facts(),
            min_fact_chars: default_min_fact_chars(),
        }
    }
}

/// Topics an inbound request may not be about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Words or phrases that get a request refused, matched whole-word and
    /// case-insensitively
    #[serde(default = "default_blocked_topics")]
    pub blocked_topics: Vec<String>,
}

fn default_blocked_topics() -> Vec<String> {
    [
        "hacking",
        "exploit",
        "vulnerability",
        "weapon",
        "bomb",
        "malware",
        "ransomware",
        "phishing",
        "social engineering",
        "credit card",
        "ssn",
        "social security",
        "password",
        "api key",
        "secret key",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            blocked_topics: default_blocked_topics(),
        }
    }
}

/// Custom per-million-token pricing for a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingOverride {
    pub model: String,
    /// Price per 1M input tokens in USD
    pub input_per_m: f64,
    /// Price per 1M output tokens in USD
    pub output_per_m: f64,
}

impl AppConfig {
    /// Load configuration from the default path (~/.runwarden/config.toml).
    ///
    /// Also checks environment variables:
    /// - `RUNWARDEN_API_KEY` (highest priority), `OPENROUTER_API_KEY`, `OPENAI_API_KEY`
    /// - `RUNWARDEN_PROVIDER`, `RUNWARDEN_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_env(&Self::config_path())
    }

    /// Load a specific file, then apply environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through a lookup function.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("RUNWARDEN_API_KEY") {
            self.api_key = Some(key);
        } else if self.api_key.is_none() {
            self.api_key = lookup("OPENROUTER_API_KEY").or_else(|| lookup("OPENAI_API_KEY"));
        }

        if let Some(provider) = lookup("RUNWARDEN_PROVIDER") {
            self.default_provider = provider;
        }

        if let Some(model) = lookup("RUNWARDEN_MODEL") {
            self.default_model = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".runwarden")
    }

    /// Default config file location.
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.default_model.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "default_model must not be empty".into(),
            ));
        }

        if !(self.budget.max_time_seconds > 0.0) || !self.budget.max_time_seconds.is_finite() {
            return Err(ConfigError::ValidationError(
                "budget.max_time_seconds must be a finite number > 0".into(),
            ));
        }

        if self.budget.max_cost < 0.0 || self.budget.max_cost.is_nan() {
            return Err(ConfigError::ValidationError(
                "budget.max_cost must be >= 0".into(),
            ));
        }

        if self.tools.timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "tools.timeout_seconds must be > 0".into(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be >= 1".into(),
            ));
        }

        if self.retry.backoff_max_ms < self.retry.backoff_base_ms {
            return Err(ConfigError::ValidationError(
                "retry.backoff_max_ms must be >= retry.backoff_base_ms".into(),
            ));
        }

        if self.memory.short_term_max_turns == 0 {
            return Err(ConfigError::ValidationError(
                "memory.short_term_max_turns must be >= 1".into(),
            ));
        }

        if self.memory.long_term_max_facts == 0 {
            return Err(ConfigError::ValidationError(
                "memory.long_term_max_facts must be >= 1".into(),
            ));
        }

        if let Some(p) = self
            .pricing
            .iter()
            .find(|p| p.input_per_m < 0.0 || p.output_per_m < 0.0)
        {
            return Err(ConfigError::ValidationError(format!(
                "pricing for '{}' must not be negative",
                p.model
            )));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: None,
            default_provider: default_provider(),
            default_model: default_model(),
            verification_model: None,
            fallback_models: vec![],
            temperature: default_temperature(),
            max_response_tokens: default_max_response_tokens(),
            budget: BudgetConfig::default(),
            tools: ToolsConfig::default(),
            guardrails: GuardrailConfig::default(),
            retry: RetryConfig::default(),
            agent: AgentConfig::default(),
            memory: MemoryConfig::default(),
            policy: PolicyConfig::default(),
            pricing: vec![],
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_provider, "openrouter");
        assert_eq!(config.budget.max_tool_calls, 15);
        assert_eq!(config.budget.max_time_seconds, 180.0);
        assert_eq!(config.budget.max_tokens, 64_000);
        assert_eq!(config.agent.max_consecutive_clarifications, 2);
        assert_eq!(config.tools.allowed_tools, vec!["*".to_string()]);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.default_model, config.default_model);
        assert_eq!(parsed.tools.timeout_seconds, config.tools.timeout_seconds);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let toml_str = r#"
default_model = "openai/gpt-4o"
fallback_models = ["anthropic/claude-3.5-haiku"]

[budget]
max_tool_calls = 3

[tools]
allowed_tools = ["calculator", "echo"]
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.budget.max_tool_calls, 3);
        assert_eq!(config.budget.max_cost, 5.0);
        assert_eq!(config.tools.allowed_tools.len(), 2);
        assert_eq!(config.tools.max_output_chars, 12_000);
        assert_eq!(config.fallback_models.len(), 1);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn infinite_time_budget_rejected() {
        for bad in [f64::INFINITY, f64::NAN] {
            let mut config = AppConfig::default();
            config.budget.max_time_seconds = bad;
            assert!(config.validate().is_err(), "{bad}");
        }
        let mut config = AppConfig::default();
        config.budget.max_time_seconds = 1e20;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_time_budget_rejected() {
        let mut config = AppConfig::default();
        config.budget.max_time_seconds = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn zero_long_term_cap_rejected() {
        let mut config = AppConfig::default();
        assert_eq!(config.memory.long_term_max_facts, 500);
        config.memory.long_term_max_facts = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn policy_section_overrides_topics() {
        let toml_str = r#"
[policy]
blocked_topics = ["lottery numbers"]

[agent]
max_quality_retries = 0
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert!(config.policy.enabled);
        assert_eq!(config.policy.blocked_topics, vec!["lottery numbers".to_string()]);
        assert!(config.agent.quality_check);
        assert_eq!(config.agent.max_quality_retries, 0);
        assert!(AppConfig::default().policy.blocked_topics.contains(&"malware".to_string()));
    }

    #[test]
    fn inverted_backoff_rejected() {
        let mut config = AppConfig::default();
        config.retry.backoff_base_ms = 1_000;
        config.retry.backoff_max_ms = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.default_provider, "openrouter");
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "default_model = \"local/model\"\n[agent]\nmax_iterations = 7").unwrap();
        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.default_model, "local/model");
        assert_eq!(config.agent.max_iterations, 7);
    }

    #[test]
    fn unparseable_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "this is = = not toml").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("RUNWARDEN_API_KEY", "sk-test"),
            ("RUNWARDEN_MODEL", "openai/gpt-4o"),
        ]
        .into_iter()
        .collect();
        let mut config = AppConfig::default();
        config.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.default_model, "openai/gpt-4o");
        assert_eq!(config.default_provider, "openrouter");
    }

    #[test]
    fn file_key_wins_over_generic_env_keys() {
        let mut config = AppConfig {
            api_key: Some("from-file".into()),
            ..AppConfig::default()
        };
        config.apply_env_overrides(|k| (k == "OPENAI_API_KEY").then(|| "from-env".to_string()));
        assert_eq!(config.api_key.as_deref(), Some("from-file"));
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = AppConfig {
            api_key: Some("sk-very-secret".into()),
            ..AppConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-very-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("openrouter"));
        assert!(toml_str.contains("max_tool_calls"));
    }
}
