//! Built-in pricing table for common models.
//!
//! Prices are in USD per 1 million tokens. Entries from the `[[pricing]]`
//! config section override or extend the built-ins.

use std::collections::HashMap;

use runwarden_config::PricingOverride;
use runwarden_core::Usage;
use serde::{Deserialize, Serialize};

/// Per-million-token pricing for a model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_m: f64,
    pub output_per_m: f64,
}

impl ModelPricing {
    pub fn new(input_per_m: f64, output_per_m: f64) -> Self {
        Self {
            input_per_m,
            output_per_m,
        }
    }

    /// Cost for the given token counts.
    pub fn cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        (f64::from(input_tokens) * self.input_per_m + f64::from(output_tokens) * self.output_per_m)
            / 1_000_000.0
    }
}

/// Model name to pricing lookup.
#[derive(Debug, Clone)]
pub struct PricingTable {
    prices: HashMap<String, ModelPricing>,
}

impl PricingTable {
    /// A table with built-in model prices.
    pub fn with_defaults() -> Self {
        let builtin = [
            ("anthropic/claude-sonnet-4", 3.0, 15.0),
            ("anthropic/claude-3.5-haiku", 0.8, 4.0),
            ("openai/gpt-4o", 2.5, 10.0),
            ("openai/gpt-4o-mini", 0.15, 0.6),
            ("openai/o3-mini", 1.1, 4.4),
            ("google/gemini-2.0-flash", 0.1, 0.4),
            ("meta-llama/llama-3.1-70b", 0.52, 0.75),
            ("mistral/mistral-small", 0.2, 0.6),
            ("deepseek/deepseek-v3", 0.27, 1.1),
        ];
        let prices = builtin
            .into_iter()
            .map(|(name, input, output)| (name.to_string(), ModelPricing::new(input, output)))
            .collect();
        Self { prices }
    }

    pub fn empty() -> Self {
        Self {
            prices: HashMap::new(),
        }
    }

    /// Built-in prices with configured overrides applied on top.
    pub fn with_overrides(overrides: &[PricingOverride]) -> Self {
        let mut table = Self::with_defaults();
        for o in overrides {
            table.set(
                o.model.clone(),
                ModelPricing::new(o.input_per_m, o.output_per_m),
            );
        }
        table
    }

    pub fn get(&self, model: &str) -> Option<ModelPricing> {
        self.prices.get(model).copied()
    }

    /// Add or replace pricing for a model.
    pub fn set(&mut self, model: impl Into<String>, pricing: ModelPricing) {
        self.prices.insert(model.into(), pricing);
    }

    /// Resolve pricing for a model name as reported by a provider.
    ///
    /// Tries an exact match, then a match on the name without its provider
    /// prefix, then the longest known bare name that prefixes the model
    /// (`gpt-4o-mini-2024-07-18` resolves to `gpt-4o-mini`).
    pub fn lookup(&self, model: &str) -> Option<ModelPricing> {
        if let Some(p) = self.prices.get(model) {
            return Some(*p);
        }
        let lowered = model.to_lowercase();
        let bare = bare_name(&lowered);

        self.prices
            .iter()
            .filter(|(key, _)| bare.starts_with(&bare_name(key).to_lowercase()))
            .max_by(|(a, _), (b, _)| {
                bare_name(a)
                    .len()
                    .cmp(&bare_name(b).len())
                    .then_with(|| b.cmp(a))
            })
            .map(|(_, p)| *p)
    }

    /// Estimated cost of one call, or 0.0 for unknown models.
    pub fn estimate(&self, model: &str, usage: &Usage) -> f64 {
        self.lookup(model)
            .map(|p| p.cost(usage.prompt_tokens, usage.completion_tokens))
            .unwrap_or(0.0)
    }

    /// Known model names, sorted.
    pub fn models(&self) -> Vec<String> {
        let mut names: Vec<String> = self.prices.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn bare_name(model: &str) -> &str {
    model.rsplit('/').next().unwrap_or(model)
}
