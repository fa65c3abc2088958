//! Secret redaction for text that leaves the tool boundary (logs, memory).

use std::sync::OnceLock;

use regex_lite::{Captures, Regex};
use serde_json::Value;

const REDACTION_MARKER: &str = "[REDACTED]";

/// Credential shapes that are masked whole.
fn token_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"sk-[A-Za-z0-9_-]{20,}",
            r"AKIA[0-9A-Z]{16}",
            r"gh[pousr]_[A-Za-z0-9]{36,}",
            r"-----BEGIN [A-Z ]*PRIVATE KEY-----",
        ]
        .into_iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

/// Key/value shapes where only the value is masked.
fn keyword_value_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r#"(?i)(?P<prefix>"(?:api[_-]?key|access[_-]?token|token|password|secret)"\s*:\s*")(?P<value>[^"\n]+)(?P<suffix>")"#,
            r"(?i)(?P<prefix>\b(?:api[_-]?key|access[_-]?token|token|password|passwd|secret)\b\s*[:=]\s*)(?P<value>[^\s,;]+)",
            r"(?i)(?P<prefix>\bbearer\s+)(?P<value>[^\s,;]+)",
        ]
        .into_iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

/// Whether `text` contains anything that looks like a credential.
pub fn contains_secret(text: &str) -> bool {
    token_patterns()
        .iter()
        .chain(keyword_value_patterns())
        .any(|re| re.is_match(text))
}

/// Replace credential-looking substrings with `[REDACTED]`.
pub fn redact_secrets(text: &str) -> String {
    let mut scrubbed = text.to_owned();
    for re in token_patterns() {
        scrubbed = re.replace_all(&scrubbed, REDACTION_MARKER).into_owned();
    }
    for re in keyword_value_patterns() {
        scrubbed = re
            .replace_all(&scrubbed, |caps: &Captures<'_>| {
                let prefix = caps.name("prefix").map_or("", |m| m.as_str());
                let suffix = caps.name("suffix").map_or("", |m| m.as_str());
                format!("{prefix}{REDACTION_MARKER}{suffix}")
            })
            .into_owned();
    }
    scrubbed
}

/// Redact every string inside a JSON value.
pub fn redact_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(redact_secrets(s)),
        Value::Array(items) => Value::Array(items.iter().map(redact_value).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), redact_value(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}
