//! The budgeted agent loop of runwarden.
//!
//! One run turns a user message into a terminal result. The message is
//! normalized and screened by the content policy first; then:
//!
//! 1. **Assemble** context from instructions, retrieved notes, history and
//!    the latest tool observations ([`ContextAssembler`])
//! 2. **Decide** via the model ([`ModelInvoker`]): final answer, clarifying
//!    question, or tool calls
//! 3. **Act** on tool calls through the tool pipeline, recording every
//!    observation, then decide again
//!
//! A final answer is reviewed ([`QualityCheck`]) and may be sent back to the
//! model a bounded number of times.
//!
//! The budget governor is consulted at the top of every iteration and before
//! every tool call. Budget exhaustion, model failure and cancellation end the
//! run in a graceful stop that explains what was done and what to try next.

pub mod context;
pub mod event;
pub mod graceful_stop;
pub mod intake;
pub mod invoker;
pub mod loop_runner;
pub mod quality;
pub mod run_context;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use context::{
    AssembledContext, AssemblyInput, AssemblyMetadata, CLARIFY_MARKER, ContextAssembler,
    DropInfo, LayerStats, TokenBudget,
};
pub use event::{AgentEvent, EventSink, LoopState};
pub use graceful_stop::{GracefulStop, StopReport};
pub use invoker::{Invocation, ModelInvoker};
pub use loop_runner::AgentLoop;
pub use quality::{QualityCheck, QualityVerdict};
pub use run_context::RunContext;
