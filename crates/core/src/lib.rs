//! # runwarden core
//!
//! Domain types, traits, and error definitions for the runwarden agent loop.
//! This crate defines the data model every other crate works against:
//! turns and messages, tool call requests and results, model decisions,
//! retrieved notes, and the run request/result records exchanged with the
//! gateway layer.
//!
//! ## Collaborators
//!
//! Everything the loop talks to but does not own is a trait here:
//! [`Provider`] (language model backend), [`Tool`] (a registered capability),
//! [`ShortTermMemory`] and [`LongTermMemory`] (history and fact stores), and
//! [`SessionHandle`] (long-lived per-session resources such as a shell).

pub mod decision;
pub mod error;
pub mod memory;
pub mod message;
pub mod provider;
pub mod run;
pub mod session;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use decision::Decision;
pub use error::{Error, ModelError, Result};
pub use memory::{LongTermMemory, MemoryFact, RetrievedNote, ShortTermMemory};
pub use message::{Message, MessageToolCall, Role, SessionId, Turn, TurnKind};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition, Usage};
pub use run::{BudgetKind, RunRequest, RunResult, RunStep, RunUsage, TerminationReason};
pub use session::{SessionHandle, SessionRegistry};
pub use tool::{
    Tool, ToolCallRequest, ToolContext, ToolErrorKind, ToolFailure, ToolOutput, ToolRegistry,
    ToolResult,
};
