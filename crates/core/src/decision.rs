//! The model invoker's output.

use serde::{Deserialize, Serialize};

use crate::tool::ToolCallRequest;

/// What the model chose to do next. Exactly one variant is ever populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Decision {
    /// Answer the user and end the run.
    FinalAnswer { text: String },

    /// Ask the user for missing information and end the run.
    ClarifyingQuestion { text: String },

    /// Execute one or more tools, then decide again.
    ///
    /// `thought` is any text the model produced alongside the calls.
    ToolCalls {
        thought: String,
        calls: Vec<ToolCallRequest>,
    },
}

impl Decision {
    /// Short label used in logs and events.
    pub fn label(&self) -> &'static str {
        match self {
            Self::FinalAnswer { .. } => "final_answer",
            Self::ClarifyingQuestion { .. } => "clarifying_question",
            Self::ToolCalls { .. } => "tool_calls",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::ToolCalls { .. })
    }
}
