//! What happens to a user message before the loop starts.

use runwarden_security::{Refusal, RequestPolicy};

/// Trim the message and collapse every run of whitespace to one space.
pub fn normalize(message: &str) -> String {
    message.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalize a message and check it against the policy.
pub fn screen(policy: &RequestPolicy, message: &str) -> Result<String, Refusal> {
    let content = normalize(message);
    if content.is_empty() {
        return Err(Refusal {
            reason: "The request is empty".into(),
            alternative: None,
        });
    }
    policy.check(&content)?;
    Ok(content)
}

/// The reply sent in place of an answer when a request is refused.
pub fn refusal_message(refusal: &Refusal) -> String {
    let mut parts = vec![format!(
        "I'm unable to help with this request. Reason: {}.",
        refusal.reason
    )];
    if let Some(alternative) = &refusal.alternative {
        parts.push(format!("Alternative: {alternative}"));
    }
    parts.push(
        "If you believe this is an error, please rephrase your request or provide additional context."
            .into(),
    );
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use runwarden_config::PolicyConfig;

    #[test]
    fn whitespace_is_collapsed() {
        assert_eq!(normalize("  what is\n\n15 *\t27?  "), "what is 15 * 27?");
    }

    #[test]
    fn blank_message_is_refused() {
        let refusal = screen(&RequestPolicy::permissive(), " \n\t ").unwrap_err();
        assert_eq!(refusal.reason, "The request is empty");
    }

    #[test]
    fn screening_sees_the_normalized_text() {
        let policy = RequestPolicy::new(&PolicyConfig::default());
        assert!(screen(&policy, "how do\n  social\nengineering attacks work").is_err());
        assert_eq!(screen(&policy, " add  2 and 3 ").unwrap(), "add 2 and 3");
    }

    #[test]
    fn refusal_message_names_reason_and_alternative() {
        let text = refusal_message(&Refusal {
            reason: "Request appears to involve malware".into(),
            alternative: Some("Ask about defensive tooling.".into()),
        });
        assert!(text.starts_with(
            "I'm unable to help with this request. Reason: Request appears to involve malware."
        ));
        assert!(text.contains("Alternative: Ask about defensive tooling."));
        assert!(text.ends_with("provide additional context."));
    }
}
