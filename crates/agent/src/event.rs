//! Run events for observers.
//!
//! `AgentEvent`s are sent over an optional `tokio::sync::mpsc` channel while
//! a run progresses. Observers are never waited on: a full or closed channel
//! drops the event and the run carries on.

use runwarden_core::run::TerminationReason;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// States of the agent loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Start,
    Deciding,
    ExecutingTools,
    AskingClarification,
    FinalAnswer,
    GracefulStop,
}

/// Events emitted during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// The loop entered a new state.
    State { state: LoopState, iteration: u32 },

    /// A tool call is about to run.
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },

    /// A tool call finished.
    ToolResult {
        id: String,
        name: String,
        success: bool,
        output: String,
        duration_ms: u64,
    },

    /// A model call failed or was malformed and is being retried.
    Retry {
        model: String,
        attempt: u32,
        reason: String,
    },

    /// The run reached a terminal state.
    Done {
        run_id: String,
        is_final: bool,
        termination: TerminationReason,
    },
}

impl AgentEvent {
    /// Event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::State { .. } => "state",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Retry { .. } => "retry",
            Self::Done { .. } => "done",
        }
    }
}

/// Sending half handed to the loop; a default sink discards everything.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<AgentEvent>>,
}

impl EventSink {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<AgentEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    pub fn emit(&self, event: AgentEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(e) = tx.try_send(event) {
            tracing::trace!(error = %e, "Dropped agent event");
        }
    }
}
