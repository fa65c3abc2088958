//! The message a run ends with when it cannot finish normally.
//!
//! A graceful stop tells the user why the run stopped, what was already done,
//! what was left undone, and what they can change to get further.

use runwarden_core::{BudgetKind, TerminationReason, ToolCallRequest, ToolResult};

/// Everything known about the run at the moment it stopped.
#[derive(Debug, Default)]
pub struct StopReport<'a> {
    pub executed: &'a [ToolResult],
    /// Calls the model asked for that never ran.
    pub pending: &'a [ToolCallRequest],
    /// Text the model produced alongside its last tool calls.
    pub thought: Option<&'a str>,
}

/// A composed stop message plus suggestions for the user.
#[derive(Debug, Clone, PartialEq)]
pub struct GracefulStop {
    pub message: String,
    pub next_steps: Vec<String>,
}

pub fn compose(reason: &TerminationReason, report: &StopReport<'_>) -> GracefulStop {
    let mut lines = vec![format!("I had to stop before finishing: {}.", describe(reason))];

    if !report.executed.is_empty() {
        lines.push(String::new());
        lines.push("Work completed so far:".into());
        for result in report.executed {
            let status = match result.error_kind() {
                None => "succeeded".to_string(),
                Some(kind) => format!("failed ({kind})"),
            };
            lines.push(format!("- {} {status}", result.tool_name));
        }
    }

    if !report.pending.is_empty() {
        lines.push(String::new());
        lines.push("Not executed:".into());
        for call in report.pending {
            lines.push(format!("- {}", call.name));
        }
    }

    if let Some(thought) = report.thought.map(str::trim).filter(|t| !t.is_empty()) {
        lines.push(String::new());
        lines.push(format!("Last reasoning: {thought}"));
    }

    GracefulStop {
        message: lines.join("\n"),
        next_steps: next_steps(reason),
    }
}

fn describe(reason: &TerminationReason) -> String {
    match reason {
        TerminationReason::BudgetExceeded { kind } => format!("the {kind} budget is used up"),
        TerminationReason::ModelOutputInvalid { detail } => {
            format!("the model kept returning output I could not use ({detail})")
        }
        TerminationReason::ModelUnavailable { detail } => {
            format!("no language model could be reached ({detail})")
        }
        TerminationReason::Cancelled => "the run was cancelled".into(),
        TerminationReason::IterationLimit => "the step limit for one run was reached".into(),
        TerminationReason::FinalAnswer
        | TerminationReason::ClarifyingQuestion
        | TerminationReason::ForcedAnswer
        | TerminationReason::Refused { .. } => "the run ended".into(),
    }
}

fn next_steps(reason: &TerminationReason) -> Vec<String> {
    let mut steps: Vec<String> = match reason {
        TerminationReason::BudgetExceeded {
            kind: BudgetKind::ToolCalls,
        } => vec!["Raise `budget.max_tool_calls` if the task needs more tool calls.".into()],
        TerminationReason::BudgetExceeded {
            kind: BudgetKind::Time,
        } => vec!["Raise `budget.max_time_seconds` to allow longer runs.".into()],
        TerminationReason::BudgetExceeded {
            kind: BudgetKind::Tokens,
        } => vec![
            "Raise `budget.max_tokens`.".into(),
            "Start a new session to drop accumulated history.".into(),
        ],
        TerminationReason::BudgetExceeded {
            kind: BudgetKind::Cost,
        } => vec![
            "Raise `budget.max_cost`.".into(),
            "Use a cheaper `default_model`.".into(),
        ],
        TerminationReason::ModelUnavailable { .. } => vec![
            "Check the API key and network connectivity.".into(),
            "Configure `fallback_models` so another model can take over.".into(),
        ],
        TerminationReason::ModelOutputInvalid { .. } => vec![
            "Rephrase the request more explicitly.".into(),
            "Try a more capable `default_model`.".into(),
        ],
        TerminationReason::Cancelled => vec!["Run the request again when ready.".into()],
        TerminationReason::IterationLimit => {
            vec!["Raise `agent.max_iterations` if the task needs more steps.".into()]
        }
        TerminationReason::FinalAnswer
        | TerminationReason::ClarifyingQuestion
        | TerminationReason::ForcedAnswer
        | TerminationReason::Refused { .. } => return Vec::new(),
    };
    steps.push("Split the task into smaller requests.".into());
    steps
}
