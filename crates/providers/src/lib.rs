//! Model provider implementations for runwarden.
//!
//! All providers implement the `runwarden_core::Provider` trait. Which model
//! is asked for a given step is a [`ModelRouter`] strategy, and how failed
//! calls are retried is a [`RetryPolicy`] value, both consumed by the agent's
//! model invoker.

pub mod openai_compat;
pub mod retry;
pub mod router;

pub use openai_compat::OpenAiCompatProvider;
pub use retry::RetryPolicy;
pub use router::{IntentRouter, ModelRouter, TaskSignal, build_provider, default_base_url};
