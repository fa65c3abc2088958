//! Argument guardrails.
//!
//! Every string inside a tool's arguments is scanned before the tool runs:
//! - credentials are never passed to tools
//! - destructive shell idioms are refused everywhere
//! - code-bearing arguments may not reach the network or spawn processes
//! - path-bearing arguments must stay inside the scratch area, and so must
//!   any path written inside code or a shell command
//! - the serialized arguments must fit the size limit

use std::path::{Path, PathBuf};

use regex_lite::Regex;
use runwarden_config::GuardrailConfig;
use serde_json::{Map, Value};

use crate::redact::contains_secret;
use crate::scope::resolve_in_scope;

/// Argument keys whose values are paths.
const PATH_KEYS: &[&str] = &[
    "path",
    "file",
    "file_path",
    "filename",
    "cwd",
    "dir",
    "directory",
];

/// Argument keys whose values are code or commands.
const CODE_KEYS: &[&str] = &["code", "command", "script", "cmd"];

/// Device files code may name freely.
const HARMLESS_PATHS: &[&str] = &["/dev/null", "/dev/stdin", "/dev/stdout", "/dev/stderr"];

const DANGEROUS_PATTERNS: &[&str] = &[
    r"(?i)rm\s+-[a-z]*r[a-z]*f",
    r"(?i)rm\s+-[a-z]*f[a-z]*r",
    r"(?i)\b(?:bash|sh)\s+-c\b",
    r"(?i)\beval\s*\(",
    r"(?i)\bexec\s*\(",
    r"(?i)\bmkfs\b",
    r"(?i)\bdd\s+if=",
    r":\(\)\s*\{\s*:\|:&\s*\};:",
];

const CODE_PATTERNS: &[&str] = &[
    r"\bos\.system\b",
    r"\bsubprocess\b",
    r"\bshutil\.rmtree\b",
    r"\bimport\s+socket\b",
    r"\bsocket\.",
    r"\burllib\b",
    r"\brequests\.",
    r"\bhttp\.client\b",
    r"(?i)\bcurl\s",
    r"(?i)\bwget\s",
    r"(?i)\bnc\s+-",
];

/// Why a call was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GuardrailViolation {
    #[error("argument '{key}' appears to contain a secret")]
    SecretDetected { key: String },

    #[error("argument '{key}' contains a disallowed command pattern ({pattern})")]
    DangerousContent { key: String, pattern: String },

    #[error("argument '{key}' contains a disallowed network or system call ({pattern})")]
    DisallowedCall { key: String, pattern: String },

    #[error("argument '{key}': {reason}")]
    PathOutsideScratch { key: String, reason: String },

    #[error("arguments are {size} characters, over the {limit} character limit")]
    TooLarge { size: usize, limit: usize },
}

/// Compiled guardrail set for one pipeline.
#[derive(Debug, Clone)]
pub struct Guardrails {
    enabled: bool,
    max_argument_chars: usize,
    scratch_dir: PathBuf,
    dangerous: Vec<(String, Regex)>,
    code: Vec<(String, Regex)>,
}

impl Guardrails {
    /// Build from config. Invalid extra patterns are skipped with a warning.
    pub fn new(config: &GuardrailConfig, scratch_dir: impl Into<PathBuf>) -> Self {
        let dangerous = compile(DANGEROUS_PATTERNS.iter().copied());
        let mut code = compile(CODE_PATTERNS.iter().copied());
        code.extend(compile(config.extra_blocked_patterns.iter().map(String::as_str)));
        Self {
            enabled: config.enabled,
            max_argument_chars: config.max_argument_chars,
            scratch_dir: scratch_dir.into(),
            dangerous,
            code,
        }
    }

    /// Guardrails that allow everything.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            max_argument_chars: usize::MAX,
            scratch_dir: std::env::temp_dir(),
            dangerous: Vec::new(),
            code: Vec::new(),
        }
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Check a call's arguments. `Ok(())` means the call may run.
    pub fn check(&self, arguments: &Map<String, Value>) -> Result<(), GuardrailViolation> {
        if !self.enabled {
            return Ok(());
        }

        let size = Value::Object(arguments.clone()).to_string().chars().count();
        if size > self.max_argument_chars {
            return Err(GuardrailViolation::TooLarge {
                size,
                limit: self.max_argument_chars,
            });
        }

        for (key, value) in arguments {
            self.check_value(key, value)?;
        }
        Ok(())
    }

    fn check_value(&self, key: &str, value: &Value) -> Result<(), GuardrailViolation> {
        match value {
            Value::String(text) => self.check_text(key, text),
            Value::Array(items) => items.iter().try_for_each(|v| self.check_value(key, v)),
            Value::Object(map) => map.iter().try_for_each(|(k, v)| self.check_value(k, v)),
            _ => Ok(()),
        }
    }

    fn check_text(&self, key: &str, text: &str) -> Result<(), GuardrailViolation> {
        if contains_secret(text) {
            return Err(GuardrailViolation::SecretDetected { key: key.into() });
        }

        if let Some((pattern, _)) = self.dangerous.iter().find(|(_, re)| re.is_match(text)) {
            return Err(GuardrailViolation::DangerousContent {
                key: key.into(),
                pattern: pattern.clone(),
            });
        }

        let key_lower = key.to_lowercase();
        if CODE_KEYS.contains(&key_lower.as_str())
            && let Some((pattern, _)) = self.code.iter().find(|(_, re)| re.is_match(text))
        {
            return Err(GuardrailViolation::DisallowedCall {
                key: key.into(),
                pattern: pattern.clone(),
            });
        }

        if PATH_KEYS.contains(&key_lower.as_str()) {
            self.check_path(key, text)?;
        }

        if CODE_KEYS.contains(&key_lower.as_str()) {
            for word in embedded_paths(text) {
                self.check_path(key, word)?;
            }
        }

        Ok(())
    }

    fn check_path(&self, key: &str, path: &str) -> Result<(), GuardrailViolation> {
        let outside = |reason: String| GuardrailViolation::PathOutsideScratch {
            key: key.into(),
            reason,
        };
        if path == "~" || path.starts_with("~/") {
            return Err(outside(format!("Path '{path}' points into the home directory")));
        }
        resolve_in_scope(path, &self.scratch_dir)
            .map(|_| ())
            .map_err(|e| outside(e.to_string()))
    }
}

/// Path-like words inside code or a shell command: absolute paths, home
/// paths, and anything with a `..` component.
///
/// Words are split on whitespace, quotes, brackets and shell operators, so
/// `open('../x')` yields `../x` and `cat a 2>/dev/null` yields `/dev/null`.
/// A lone `/` is division, not a path.
fn embedded_paths(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| {
        c.is_whitespace() || "'\"`()[]{},;:<>|&=".contains(c)
    })
    .filter(|word| {
        let absolute = word.len() > 1
            && word.starts_with('/')
            && !word.starts_with("//")
            && !HARMLESS_PATHS.contains(word);
        let home = *word == "~" || word.starts_with("~/");
        absolute || home || word.split('/').any(|part| part == "..")
    })
}

fn compile<'a>(patterns: impl Iterator<Item = &'a str>) -> Vec<(String, Regex)> {
    patterns
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some((p.to_string(), re)),
            Err(e) => {
                tracing::warn!(pattern = p, error = %e, "skipping invalid guardrail pattern");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn guardrails() -> Guardrails {
        Guardrails::new(&GuardrailConfig::default(), "/tmp/runwarden")
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn benign_arguments_pass() {
        let g = guardrails();
        assert!(g.check(&args(json!({"expression": "15 * 27"}))).is_ok());
        assert!(g.check(&args(json!({"code": "print(15 * 27)"}))).is_ok());
        assert!(g.check(&args(json!({"path": "notes/today.md"}))).is_ok());
    }

    #[test]
    fn secrets_denied() {
        let err = guardrails()
            .check(&args(json!({"text": "key sk-abcdefghijklmnopqrstuvwxyz0123"})))
            .unwrap_err();
        assert!(matches!(err, GuardrailViolation::SecretDetected { .. }));
    }

    #[test]
    fn destructive_commands_denied() {
        let err = guardrails()
            .check(&args(json!({"command": "rm -rf /"})))
            .unwrap_err();
        assert!(matches!(err, GuardrailViolation::DangerousContent { .. }));
        assert!(
            guardrails()
                .check(&args(json!({"command": "bash -c 'echo hi'"})))
                .is_err()
        );
    }

    #[test]
    fn network_calls_in_code_denied() {
        let err = guardrails()
            .check(&args(json!({"code": "import socket\ns = socket.socket()"})))
            .unwrap_err();
        assert!(matches!(err, GuardrailViolation::DisallowedCall { .. }));
        assert!(
            guardrails()
                .check(&args(json!({"code": "import os\nos.system('ls')"})))
                .is_err()
        );
    }

    #[test]
    fn network_words_outside_code_pass() {
        let g = guardrails();
        assert!(g.check(&args(json!({"text": "explain how curl works"}))).is_ok());
    }

    #[test]
    fn traversal_outside_scratch_denied() {
        let err = guardrails()
            .check(&args(json!({"path": "../../etc/passwd"})))
            .unwrap_err();
        assert!(matches!(err, GuardrailViolation::PathOutsideScratch { .. }));
    }

    #[test]
    fn paths_inside_code_must_stay_in_scratch() {
        let g = guardrails();
        for code in [
            "print(open('../../../etc/passwd').read())",
            "with open(\"/etc/hosts\") as f:\n    print(f.read())",
            "import os\nprint(os.listdir('~/'))",
        ] {
            let err = g.check(&args(json!({"code": code}))).unwrap_err();
            assert!(
                matches!(err, GuardrailViolation::PathOutsideScratch { .. }),
                "{code}"
            );
        }
    }

    #[test]
    fn paths_inside_commands_must_stay_in_scratch() {
        let g = guardrails();
        for command in [
            "cat ../../../../etc/passwd",
            "cat /etc/shadow",
            "cd .. && ls",
            "ls>/tmp/elsewhere.txt",
        ] {
            let err = g.check(&args(json!({"command": command}))).unwrap_err();
            assert!(
                matches!(err, GuardrailViolation::PathOutsideScratch { .. }),
                "{command}"
            );
        }
    }

    #[test]
    fn scoped_paths_and_division_in_code_pass() {
        let g = guardrails();
        for allowed in [
            json!({"code": "print(10 / 4, 7 // 2)"}),
            json!({"code": "print(open('out/result.txt').read())"}),
            json!({"code": "open('/tmp/runwarden/data.csv')"}),
            json!({"command": "cat notes/../notes/today.md 2>/dev/null"}),
            json!({"command": "echo $((6/2))"}),
        ] {
            assert!(g.check(&args(allowed.clone())).is_ok(), "{allowed}");
        }
    }

    #[test]
    fn oversize_arguments_denied() {
        let big = "x".repeat(10_001);
        let err = guardrails().check(&args(json!({"text": big}))).unwrap_err();
        assert!(matches!(err, GuardrailViolation::TooLarge { limit: 10_000, .. }));
    }

    #[test]
    fn extra_patterns_apply_to_code() {
        let config = GuardrailConfig {
            extra_blocked_patterns: vec![r"\bctypes\b".into(), "(".into()],
            ..GuardrailConfig::default()
        };
        let g = Guardrails::new(&config, "/tmp/runwarden");
        assert!(g.check(&args(json!({"code": "import ctypes"}))).is_err());
    }

    #[test]
    fn disabled_allows_everything() {
        let config = GuardrailConfig {
            enabled: false,
            ..GuardrailConfig::default()
        };
        let g = Guardrails::new(&config, "/tmp/runwarden");
        assert!(g.check(&args(json!({"command": "rm -rf /"}))).is_ok());
        assert!(Guardrails::disabled().check(&args(json!({"path": "/etc"}))).is_ok());
    }
}
