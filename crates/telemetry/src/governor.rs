//! Per-run budget governor.
//!
//! One governor is owned by exactly one run. Counters only ever grow; the
//! clock starts when the governor is created. Time is read from
//! `tokio::time::Instant` so paused-clock tests advance it deterministically.

use std::time::Duration;

use runwarden_config::BudgetConfig;
use runwarden_core::{BudgetKind, RunUsage, Usage};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Configured consumption ceilings for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetCeilings {
    pub max_tool_calls: u32,
    pub max_time: Duration,
    pub max_tokens: u64,
    pub max_cost: f64,
}

impl BudgetCeilings {
    pub fn from_config(config: &BudgetConfig) -> Self {
        Self {
            max_tool_calls: config.max_tool_calls,
            max_time: Duration::try_from_secs_f64(config.max_time_seconds.max(0.0))
                .unwrap_or(Duration::MAX),
            max_tokens: config.max_tokens,
            max_cost: config.max_cost,
        }
    }
}

impl Default for BudgetCeilings {
    fn default() -> Self {
        Self::from_config(&BudgetConfig::default())
    }
}

/// The well-defined points at which the loop consults the governor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    /// Top of every loop iteration. Deciding spends no tool calls, so the
    /// tool-call ceiling is not consulted here.
    IterationStart,
    /// Before a batch of tool calls and before each call in it.
    BeforeTools,
}

/// Tracks consumption against ceilings for a single run.
#[derive(Debug)]
pub struct BudgetGovernor {
    ceilings: BudgetCeilings,
    started_at: Instant,
    tool_calls: u32,
    model_calls: u32,
    prompt_tokens: u64,
    completion_tokens: u64,
    tokens: u64,
    cost: f64,
}

impl BudgetGovernor {
    /// Create a governor; the run's clock starts now.
    pub fn new(ceilings: BudgetCeilings) -> Self {
        Self {
            ceilings,
            started_at: Instant::now(),
            tool_calls: 0,
            model_calls: 0,
            prompt_tokens: 0,
            completion_tokens: 0,
            tokens: 0,
            cost: 0.0,
        }
    }

    pub fn ceilings(&self) -> &BudgetCeilings {
        &self.ceilings
    }

    /// Record consumption of `amount` units of `kind`.
    ///
    /// Negative and non-finite amounts are ignored so counters stay
    /// monotonic. Time cannot be charged; it is measured.
    pub fn charge(&mut self, kind: BudgetKind, amount: f64) {
        if !amount.is_finite() || amount <= 0.0 {
            return;
        }
        match kind {
            BudgetKind::ToolCalls => {
                self.tool_calls = self.tool_calls.saturating_add(amount.ceil() as u32);
            }
            BudgetKind::Tokens => {
                self.tokens = self.tokens.saturating_add(amount.ceil() as u64);
            }
            BudgetKind::Cost => self.cost += amount,
            BudgetKind::Time => {
                tracing::debug!("ignoring explicit time charge; elapsed time is measured");
            }
        }
    }

    /// Charge one tool call.
    pub fn charge_tool_call(&mut self) {
        self.charge(BudgetKind::ToolCalls, 1.0);
    }

    /// Charge one model round trip with its token usage and cost.
    pub fn charge_model_call(&mut self, usage: &Usage, cost: f64) {
        self.model_calls = self.model_calls.saturating_add(1);
        self.prompt_tokens += u64::from(usage.prompt_tokens);
        self.completion_tokens += u64::from(usage.completion_tokens);
        let total = if usage.total_tokens > 0 {
            usage.total_tokens
        } else {
            usage.prompt_tokens.saturating_add(usage.completion_tokens)
        };
        self.charge(BudgetKind::Tokens, f64::from(total));
        self.charge(BudgetKind::Cost, cost);
    }

    /// Headroom left for `kind`, never negative. Time is in seconds.
    pub fn remaining(&self, kind: BudgetKind) -> f64 {
        match kind {
            BudgetKind::ToolCalls => {
                f64::from(self.ceilings.max_tool_calls.saturating_sub(self.tool_calls))
            }
            BudgetKind::Time => self.remaining_time().as_secs_f64(),
            BudgetKind::Tokens => self.ceilings.max_tokens.saturating_sub(self.tokens) as f64,
            BudgetKind::Cost => (self.ceilings.max_cost - self.cost).max(0.0),
        }
    }

    /// Wall-clock time left before the time ceiling.
    pub fn remaining_time(&self) -> Duration {
        self.ceilings.max_time.saturating_sub(self.elapsed())
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Whether `kind` is at or past its ceiling.
    pub fn is_exhausted(&self, kind: BudgetKind) -> bool {
        match kind {
            BudgetKind::ToolCalls => self.tool_calls >= self.ceilings.max_tool_calls,
            BudgetKind::Time => self.elapsed() >= self.ceilings.max_time,
            BudgetKind::Tokens => self.tokens >= self.ceilings.max_tokens,
            BudgetKind::Cost => self.cost >= self.ceilings.max_cost,
        }
    }

    /// True if any ceiling is at or past its limit.
    pub fn exceeded(&self) -> bool {
        self.exceeded_kind().is_some()
    }

    /// The first exhausted dimension, checked in a fixed order.
    pub fn exceeded_kind(&self) -> Option<BudgetKind> {
        [
            BudgetKind::ToolCalls,
            BudgetKind::Time,
            BudgetKind::Tokens,
            BudgetKind::Cost,
        ]
        .into_iter()
        .find(|kind| self.is_exhausted(*kind))
    }

    /// Consult the governor at a loop checkpoint. Returns the exhausted
    /// dimension if the run must stop.
    pub fn check(&self, checkpoint: Checkpoint) -> Option<BudgetKind> {
        let kind = match checkpoint {
            Checkpoint::BeforeTools => self.exceeded_kind(),
            // Tool calls are checked before tools run, not before deciding
            Checkpoint::IterationStart => [BudgetKind::Time, BudgetKind::Tokens, BudgetKind::Cost]
                .into_iter()
                .find(|kind| self.is_exhausted(*kind)),
        };
        if let Some(kind) = kind {
            tracing::info!(?checkpoint, %kind, "budget ceiling reached");
        }
        kind
    }

    pub fn tool_calls_used(&self) -> u32 {
        self.tool_calls
    }

    pub fn tokens_used(&self) -> u64 {
        self.tokens
    }

    pub fn cost_accrued(&self) -> f64 {
        self.cost
    }

    /// Snapshot of consumption for the run result.
    pub fn usage(&self) -> RunUsage {
        RunUsage {
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            total_tokens: self.tokens,
            cost: self.cost,
            tool_calls: self.tool_calls,
            model_calls: self.model_calls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn huge_or_infinite_time_ceiling_saturates() {
        for secs in [1e20, f64::INFINITY] {
            let config = BudgetConfig {
                max_time_seconds: secs,
                ..BudgetConfig::default()
            };
            assert_eq!(BudgetCeilings::from_config(&config).max_time, Duration::MAX);
        }
        let config = BudgetConfig {
            max_time_seconds: -3.0,
            ..BudgetConfig::default()
        };
        assert_eq!(BudgetCeilings::from_config(&config).max_time, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_time_ceiling_is_never_exhausted() {
        let config = BudgetConfig {
            max_time_seconds: 1e20,
            ..BudgetConfig::default()
        };
        let governor = BudgetGovernor::new(BudgetCeilings::from_config(&config));
        tokio::time::advance(Duration::from_secs(86_400)).await;
        assert!(!governor.is_exhausted(BudgetKind::Time));
        assert!(governor.remaining_time() > Duration::from_secs(86_400));
    }

    fn ceilings(tools: u32, secs: u64, tokens: u64, cost: f64) -> BudgetCeilings {
        BudgetCeilings {
            max_tool_calls: tools,
            max_time: Duration::from_secs(secs),
            max_tokens: tokens,
            max_cost: cost,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_governor_is_not_exceeded() {
        let governor = BudgetGovernor::new(ceilings(3, 10, 100, 1.0));
        assert!(!governor.exceeded());
        assert_eq!(governor.remaining(BudgetKind::ToolCalls), 3.0);
        assert_eq!(governor.remaining(BudgetKind::Tokens), 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn tool_call_ceiling_is_inclusive() {
        let mut governor = BudgetGovernor::new(ceilings(2, 10, 100, 1.0));
        governor.charge_tool_call();
        assert!(!governor.exceeded());
        governor.charge_tool_call();
        assert!(governor.exceeded());
        assert_eq!(governor.exceeded_kind(), Some(BudgetKind::ToolCalls));
        assert_eq!(governor.remaining(BudgetKind::ToolCalls), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn negative_and_nan_charges_are_ignored() {
        let mut governor = BudgetGovernor::new(ceilings(5, 10, 100, 1.0));
        governor.charge(BudgetKind::Tokens, 40.0);
        governor.charge(BudgetKind::Tokens, -30.0);
        governor.charge(BudgetKind::Cost, f64::NAN);
        assert_eq!(governor.tokens_used(), 40);
        assert_eq!(governor.cost_accrued(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn time_ceiling_follows_clock() {
        let governor = BudgetGovernor::new(ceilings(5, 1, 100, 1.0));
        assert!(governor.check(Checkpoint::IterationStart).is_none());
        tokio::time::advance(Duration::from_millis(1_500)).await;
        assert_eq!(
            governor.check(Checkpoint::IterationStart),
            Some(BudgetKind::Time)
        );
        assert_eq!(governor.remaining_time(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn iteration_checkpoint_ignores_tool_calls() {
        let mut governor = BudgetGovernor::new(ceilings(1, 10, 100, 1.0));
        governor.charge_tool_call();
        assert!(governor.check(Checkpoint::IterationStart).is_none());
        assert_eq!(
            governor.check(Checkpoint::BeforeTools),
            Some(BudgetKind::ToolCalls)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn model_call_charges_tokens_and_cost() {
        let mut governor = BudgetGovernor::new(ceilings(5, 10, 100, 0.01));
        let usage = Usage {
            prompt_tokens: 60,
            completion_tokens: 50,
            total_tokens: 0,
            cost: None,
        };
        governor.charge_model_call(&usage, 0.02);
        assert_eq!(governor.tokens_used(), 110);
        assert_eq!(governor.check(Checkpoint::IterationStart), Some(BudgetKind::Tokens));

        let snapshot = governor.usage();
        assert_eq!(snapshot.model_calls, 1);
        assert_eq!(snapshot.prompt_tokens, 60);
        assert_eq!(snapshot.completion_tokens, 50);
        assert!(governor.is_exhausted(BudgetKind::Cost));
    }

    #[test]
    fn ceilings_from_config() {
        let c = BudgetCeilings::default();
        assert_eq!(c.max_tool_calls, 15);
        assert_eq!(c.max_time, Duration::from_secs(180));
    }
}
