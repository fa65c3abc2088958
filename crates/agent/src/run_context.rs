//! Per-run state owned by the agent loop.

use chrono::{DateTime, Utc};
use runwarden_core::{SessionId, TerminationReason};
use runwarden_telemetry::{BudgetCeilings, BudgetGovernor};

/// Identifies one run and owns its budget governor. Dropped when the run ends.
#[derive(Debug)]
pub struct RunContext {
    pub run_id: String,
    pub session_id: SessionId,
    pub started_at: DateTime<Utc>,
    pub governor: BudgetGovernor,
    /// Unset until the loop reaches a terminal state.
    pub termination: Option<TerminationReason>,
}

impl RunContext {
    pub fn new(session_id: SessionId, ceilings: BudgetCeilings) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            session_id,
            started_at: Utc::now(),
            governor: BudgetGovernor::new(ceilings),
            termination: None,
        }
    }

    /// One-line budget status for the model. Only counters that change
    /// through the run's own actions are shown, so it is stable between
    /// identical states.
    pub fn budget_line(&self) -> String {
        let ceilings = self.governor.ceilings();
        format!(
            "Budget: {} of {} tool calls used; time limit {}s.",
            self.governor.tool_calls_used(),
            ceilings.max_tool_calls,
            ceilings.max_time.as_secs()
        )
    }
}
