//! Run request and result records exchanged with the gateway layer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::message::SessionId;
use crate::tool::{ToolCallRequest, ToolResult};

/// A validated inbound request: one user message for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub message: String,
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl RunRequest {
    pub fn new(message: impl Into<String>, session_id: SessionId) -> Self {
        Self {
            message: message.into(),
            session_id,
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// The consumption dimensions a run is budgeted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetKind {
    ToolCalls,
    Time,
    Tokens,
    Cost,
}

impl std::fmt::Display for BudgetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ToolCalls => "tool calls",
            Self::Time => "time",
            Self::Tokens => "tokens",
            Self::Cost => "cost",
        };
        f.write_str(name)
    }
}

/// Why a run ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum TerminationReason {
    FinalAnswer,
    ClarifyingQuestion,
    /// The clarification ceiling was reached and a best-effort answer was given.
    ForcedAnswer,
    BudgetExceeded { kind: BudgetKind },
    ModelOutputInvalid { detail: String },
    ModelUnavailable { detail: String },
    Cancelled,
    IterationLimit,
    /// The request was refused by the content policy before any model call.
    Refused { reason: String },
}

impl TerminationReason {
    /// Whether this reason is a graceful stop rather than a normal answer.
    pub fn is_graceful_stop(&self) -> bool {
        !matches!(
            self,
            Self::FinalAnswer | Self::ClarifyingQuestion | Self::ForcedAnswer | Self::Refused { .. }
        )
    }
}

/// Consumption totals reported with a result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub cost: f64,
    pub tool_calls: u32,
    pub model_calls: u32,
}

/// One act of the loop: the model's reasoning and the tool calls it made.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
    pub tool_results: Vec<ToolResult>,
}

/// The record returned for every run, whatever its terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub session_id: SessionId,
    /// Always non-empty and readable by the end user.
    pub message: String,
    pub is_final: bool,
    pub termination: TerminationReason,
    pub tool_calls: Vec<ToolCallRequest>,
    pub tool_results: Vec<ToolResult>,
    /// The same calls and results grouped by the decision that made them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<RunStep>,
    pub usage: RunUsage,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub next_steps: Vec<String>,
}
