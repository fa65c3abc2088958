//! Error types for the runwarden domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum.
//!
//! Tool failures that reach the agent loop are not errors: the pipeline turns
//! them into a failed [`ToolResult`](crate::tool::ToolResult) carrying a
//! [`ToolErrorKind`](crate::tool::ToolErrorKind). [`ToolError`] is what a
//! tool implementation returns to the pipeline.

use thiserror::Error;

/// The top-level error type for all runwarden operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Model invocation errors ---
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    // --- Memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Whether retrying the same model may succeed.
    ///
    /// Credentials, unknown models and missing configuration will fail the
    /// same way on every attempt, so those move straight to the next fallback.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::ApiError { status_code, .. } => *status_code >= 500 || *status_code == 408,
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Network(_) => true,
            Self::AuthenticationFailed(_) | Self::ModelNotFound(_) | Self::NotConfigured(_) => {
                false
            }
        }
    }
}

/// Failures of the model invoker that survive retries, repair and fallback.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("model output invalid after {attempts} attempt(s): {reason}")]
    ModelOutputInvalid { attempts: u32, reason: String },

    #[error("no model available (tried {}): {last_error}", models_tried.join(", "))]
    ModelUnavailable {
        models_tried: Vec<String>,
        last_error: String,
    },

    #[error("model invocation cancelled")]
    Cancelled,

    #[error("run budget exhausted during model invocation")]
    BudgetExhausted,
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Invalid schema for tool {tool_name}: {reason}")]
    InvalidSchema { tool_name: String, reason: String },

    #[error("Duplicate tool name: {0}")]
    DuplicateName(String),

    #[error("No open session resource for session {0}")]
    SessionNotOpen(String),

    #[error("Not permitted: {0}")]
    NotPermitted(String),
}
