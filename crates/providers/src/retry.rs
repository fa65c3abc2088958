//! Retry policy for provider calls, passed around as data.
//!
//! A policy is a fixed attempt count per model, an exponential backoff
//! schedule between attempts, and an ordered list of fallback models tried
//! after the routed model is exhausted.

use std::time::Duration;

use runwarden_config::RetryConfig;
use runwarden_core::error::ProviderError;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts per model, including the first call.
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Tried in order once the routed model is exhausted.
    pub fallback_models: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(8),
            fallback_models: Vec::new(),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(retry: &RetryConfig, fallback_models: &[String]) -> Self {
        Self {
            max_attempts: retry.max_attempts,
            backoff_base: Duration::from_millis(retry.backoff_base_ms),
            backoff_max: Duration::from_millis(retry.backoff_max_ms),
            fallback_models: fallback_models.to_vec(),
        }
        .normalized()
    }

    pub fn with_fallbacks(mut self, models: Vec<String>) -> Self {
        self.fallback_models = models;
        self
    }

    /// Clamp degenerate values: at least one attempt, a non-zero base, and a
    /// cap no smaller than the base.
    pub fn normalized(self) -> Self {
        let max_attempts = self.max_attempts.max(1);
        let backoff_base = if self.backoff_base.is_zero() {
            Duration::from_millis(1)
        } else {
            self.backoff_base
        };
        let backoff_max = self.backoff_max.max(backoff_base);
        Self {
            max_attempts,
            backoff_base,
            backoff_max,
            fallback_models: self.fallback_models,
        }
    }

    /// Delay before retrying after failed attempt number `attempt` (1-based).
    pub fn backoff_delay_for_attempt(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        let factor = 1_u128 << shift;
        let base = self.backoff_base.as_millis();
        let max = self.backoff_max.as_millis();
        let delay_ms = base.saturating_mul(factor).min(max);
        Duration::from_millis(u64::try_from(delay_ms).unwrap_or(u64::MAX))
    }

    /// Delay after `error` on attempt `attempt`, or `None` when the same model
    /// should not be tried again.
    ///
    /// A rate limit's `Retry-After` wins over the schedule but is still capped.
    pub fn delay_after(&self, error: &ProviderError, attempt: u32) -> Option<Duration> {
        if !error.is_retriable() || attempt >= self.max_attempts {
            return None;
        }
        let delay = match error {
            ProviderError::RateLimited { retry_after_secs } => {
                Duration::from_secs(*retry_after_secs).min(self.backoff_max)
            }
            _ => self.backoff_delay_for_attempt(attempt),
        };
        Some(delay)
    }

    /// The routed model followed by the fallbacks, without duplicates.
    pub fn model_chain(&self, primary: &str) -> Vec<String> {
        let mut chain = vec![primary.to_string()];
        for model in &self.fallback_models {
            if !chain.contains(model) {
                chain.push(model.clone());
            }
        }
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(8),
            fallback_models: vec![],
        }
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let p = policy();
        assert_eq!(p.backoff_delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(p.backoff_delay_for_attempt(2), Duration::from_millis(1000));
        assert_eq!(p.backoff_delay_for_attempt(3), Duration::from_millis(2000));
        assert_eq!(p.backoff_delay_for_attempt(10), Duration::from_secs(8));
        assert_eq!(p.backoff_delay_for_attempt(u32::MAX), Duration::from_secs(8));
    }

    #[test]
    fn normalization_clamps_degenerate_values() {
        let p = RetryPolicy {
            max_attempts: 0,
            backoff_base: Duration::ZERO,
            backoff_max: Duration::ZERO,
            fallback_models: vec![],
        }
        .normalized();
        assert_eq!(p.max_attempts, 1);
        assert_eq!(p.backoff_base, Duration::from_millis(1));
        assert_eq!(p.backoff_max, Duration::from_millis(1));
    }

    #[test]
    fn non_retriable_errors_skip_backoff() {
        let p = policy();
        let auth = ProviderError::AuthenticationFailed("bad key".into());
        assert_eq!(p.delay_after(&auth, 1), None);
        let missing = ProviderError::ModelNotFound("m".into());
        assert_eq!(p.delay_after(&missing, 1), None);
    }

    #[test]
    fn retries_stop_at_attempt_ceiling() {
        let p = policy();
        let err = ProviderError::Network("reset".into());
        assert!(p.delay_after(&err, 1).is_some());
        assert!(p.delay_after(&err, 2).is_some());
        assert_eq!(p.delay_after(&err, 3), None);
    }

    #[test]
    fn rate_limit_uses_retry_after_capped() {
        let p = policy();
        let short = ProviderError::RateLimited { retry_after_secs: 2 };
        assert_eq!(p.delay_after(&short, 1), Some(Duration::from_secs(2)));
        let long = ProviderError::RateLimited { retry_after_secs: 600 };
        assert_eq!(p.delay_after(&long, 1), Some(Duration::from_secs(8)));
    }

    #[test]
    fn model_chain_dedupes() {
        let p = policy().with_fallbacks(vec!["b".into(), "a".into(), "c".into(), "b".into()]);
        assert_eq!(p.model_chain("a"), vec!["a", "b", "c"]);
    }

    #[test]
    fn from_config_reads_retry_section() {
        let config = RetryConfig::default();
        let p = RetryPolicy::from_config(&config, &["fallback".to_string()]);
        assert_eq!(p.max_attempts, config.max_attempts);
        assert_eq!(p.backoff_base, Duration::from_millis(config.backoff_base_ms));
        assert_eq!(p.fallback_models, vec!["fallback"]);
    }
}
