//! Memory-write policy.
//!
//! After each tool result the loop asks the policy whether the result is
//! worth remembering. Only successful results with enough output and no
//! sensitive vocabulary qualify. The stored text is redacted and cut to
//! [`SUMMARY_CHARS`].

use runwarden_config::MemoryConfig;
use runwarden_core::error::MemoryError;
use runwarden_core::{LongTermMemory, MemoryFact, SessionId, ToolResult};
use runwarden_security::redact_secrets;

/// Maximum characters of tool output kept in a fact.
pub const SUMMARY_CHARS: usize = 500;

const SENSITIVE_WORDS: &[&str] = &[
    "password",
    "secret",
    "token",
    "api key",
    "api_key",
    "apikey",
    "private key",
    "private_key",
    "credential",
];

#[derive(Debug, Clone)]
pub struct MemoryWritePolicy {
    enabled: bool,
    min_fact_chars: usize,
}

impl MemoryWritePolicy {
    pub fn new(config: &MemoryConfig) -> Self {
        Self {
            enabled: config.long_term_enabled,
            min_fact_chars: config.min_fact_chars,
        }
    }

    /// The fact to store for `result`, if any.
    pub fn decide(&self, result: &ToolResult) -> Option<MemoryFact> {
        if !self.enabled || !result.success {
            return None;
        }
        let text = result.output.trim();
        if text.chars().count() < self.min_fact_chars {
            return None;
        }
        let lower = text.to_lowercase();
        if SENSITIVE_WORDS.iter().any(|w| lower.contains(w)) {
            return None;
        }

        let (category, importance) = if lower.contains("prefer") {
            ("preference", 0.8)
        } else if lower.contains("error") || lower.contains("failed") {
            ("outcome", 0.3)
        } else {
            ("fact", 0.5)
        };

        Some(MemoryFact {
            content: summarize(&redact_secrets(text)),
            category: category.into(),
            importance,
            origin: Some(result.tool_name.clone()),
        })
    }

    /// Decide and write. Returns the stored fact's id when one was written.
    pub async fn apply(
        &self,
        store: &dyn LongTermMemory,
        session_id: &SessionId,
        result: &ToolResult,
    ) -> Result<Option<String>, MemoryError> {
        let Some(fact) = self.decide(result) else {
            return Ok(None);
        };
        let category = fact.category.clone();
        let id = store.write(session_id, fact).await?;
        tracing::debug!(tool = %result.tool_name, %category, fact_id = %id, "tool result written to long-term memory");
        Ok(Some(id))
    }
}

impl Default for MemoryWritePolicy {
    fn default() -> Self {
        Self::new(&MemoryConfig::default())
    }
}

fn summarize(text: &str) -> String {
    if text.chars().count() <= SUMMARY_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(SUMMARY_CHARS).collect();
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryLongTerm;
    use runwarden_core::ToolErrorKind;
    use serde_json::json;

    fn ok(output: &str) -> ToolResult {
        ToolResult::success("c1", "echo", json!(output), output, 3)
    }

    #[test]
    fn short_output_skipped() {
        assert!(MemoryWritePolicy::default().decide(&ok("tiny")).is_none());
    }

    #[test]
    fn failures_skipped() {
        let failed = ToolResult::failure(
            "c1",
            "echo",
            ToolErrorKind::ToolExecutionError,
            "something went wrong in a long message",
            3,
        );
        assert!(MemoryWritePolicy::default().decide(&failed).is_none());
    }

    #[test]
    fn sensitive_output_skipped() {
        let result = ok("here is the database password for production");
        assert!(MemoryWritePolicy::default().decide(&result).is_none());
    }

    #[test]
    fn categories_follow_content() {
        let policy = MemoryWritePolicy::default();
        let pref = policy.decide(&ok("the user prefers answers in French")).unwrap();
        assert_eq!(pref.category, "preference");
        assert_eq!(pref.importance, 0.8);

        let outcome = policy.decide(&ok("compilation failed with 3 warnings")).unwrap();
        assert_eq!(outcome.category, "outcome");

        let fact = policy.decide(&ok("the capital of France is Paris")).unwrap();
        assert_eq!(fact.category, "fact");
        assert_eq!(fact.origin.as_deref(), Some("echo"));
    }

    #[test]
    fn long_output_summarized() {
        let long = "word ".repeat(300);
        let fact = MemoryWritePolicy::default().decide(&ok(&long)).unwrap();
        assert_eq!(fact.content.chars().count(), SUMMARY_CHARS + 3);
        assert!(fact.content.ends_with("..."));
    }

    #[test]
    fn disabled_policy_writes_nothing() {
        let config = MemoryConfig {
            long_term_enabled: false,
            ..MemoryConfig::default()
        };
        let policy = MemoryWritePolicy::new(&config);
        assert!(policy.decide(&ok("the capital of France is Paris")).is_none());
    }

    #[tokio::test]
    async fn apply_writes_to_store() {
        let store = InMemoryLongTerm::new();
        let session = SessionId::from("s");
        let id = MemoryWritePolicy::default()
            .apply(&store, &session, &ok("the capital of France is Paris"))
            .await
            .unwrap();
        assert!(id.is_some());
        assert_eq!(store.count(&session).await, 1);
    }
}
