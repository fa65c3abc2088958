//! Budget enforcement and cost estimation for runwarden.
//!
//! The [`BudgetGovernor`] tracks what a single run has consumed (tool calls,
//! wall-clock time, tokens, cost) against configured ceilings and answers
//! "may I continue?" at the loop's checkpoints. The [`PricingTable`] turns
//! token usage into an estimated USD cost when a provider reports none.

pub mod governor;
pub mod pricing;

pub use governor::{BudgetCeilings, BudgetGovernor, Checkpoint};
pub use pricing::{ModelPricing, PricingTable};
