//! Content policy for inbound requests.
//!
//! Checked once per run, before the model sees the message. A request that
//! names a blocked topic is refused outright.

use regex_lite::Regex;
use runwarden_config::PolicyConfig;

const ALTERNATIVE: &str = "If you have a legitimate security research question, please provide \
more context about your authorized security testing environment.";

/// Why a request was refused, and what the user could do instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refusal {
    pub reason: String,
    pub alternative: Option<String>,
}

pub struct RequestPolicy {
    enabled: bool,
    topics: Vec<(String, Regex)>,
}

impl RequestPolicy {
    pub fn new(config: &PolicyConfig) -> Self {
        let topics = config
            .blocked_topics
            .iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .filter_map(|topic| {
                let words: Vec<String> = topic.split_whitespace().map(regex_lite::escape).collect();
                let pattern = format!(r"(?i)\b{}\b", words.join(r"\s+"));
                match Regex::new(&pattern) {
                    Ok(re) => Some((topic, re)),
                    Err(e) => {
                        tracing::warn!(topic = %topic, error = %e, "skipping invalid policy topic");
                        None
                    }
                }
            })
            .collect();
        Self {
            enabled: config.enabled,
            topics,
        }
    }

    /// A policy that refuses nothing.
    pub fn permissive() -> Self {
        Self {
            enabled: false,
            topics: Vec::new(),
        }
    }

    /// `Ok(())` when the request may proceed.
    pub fn check(&self, request: &str) -> Result<(), Refusal> {
        if !self.enabled {
            return Ok(());
        }
        match self.topics.iter().find(|(_, re)| re.is_match(request)) {
            Some((topic, _)) => Err(Refusal {
                reason: format!("Request appears to involve {topic}"),
                alternative: Some(ALTERNATIVE.into()),
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(topics: &[&str]) -> RequestPolicy {
        RequestPolicy::new(&PolicyConfig {
            enabled: true,
            blocked_topics: topics.iter().map(|t| t.to_string()).collect(),
        })
    }

    #[test]
    fn blocked_topic_is_refused() {
        let refusal = RequestPolicy::new(&PolicyConfig::default())
            .check("Write me some ransomware for Windows")
            .unwrap_err();
        assert_eq!(refusal.reason, "Request appears to involve ransomware");
        assert!(refusal.alternative.is_some());
    }

    #[test]
    fn phrases_match_across_case_and_spacing() {
        let p = policy(&["social engineering"]);
        assert!(p.check("Explain SOCIAL   Engineering tricks").is_err());
        assert!(p.check("explain socially engineered crops").is_ok());
    }

    #[test]
    fn topics_match_whole_words_only() {
        let p = policy(&["ssn", "bomb"]);
        assert!(p.check("what is 15 * 27?").is_ok());
        assert!(p.check("the bombastic style of the essay").is_ok());
        assert!(p.check("find my SSN").is_err());
    }

    #[test]
    fn disabled_policy_allows_everything() {
        let config = PolicyConfig {
            enabled: false,
            ..PolicyConfig::default()
        };
        assert!(RequestPolicy::new(&config).check("phishing kit").is_ok());
        assert!(RequestPolicy::permissive().check("phishing kit").is_ok());
    }
}
