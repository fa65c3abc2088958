//! Review of a final answer before it is returned.
//!
//! An answer that is empty, trails off into a bare refusal, or hedges
//! everywhere is sent back to the model with the reason. Unbalanced code
//! fences are only noted.

use regex_lite::Regex;

const REFUSAL_PHRASES: &[&str] = &["i cannot help with", "i can't help with"];

/// A refusal with less than this many bytes after it has nothing else to say.
const REFUSAL_TAIL_BYTES: usize = 50;

const UNCERTAINTY_MARKERS: &[&str] = &[
    r"(?i)\b(?:I|we) think\b",
    r"(?i)\b(?:I|we) believe\b",
    r"(?i)\b(?:I|we) assume\b",
    r"(?i)\b(?:probably|likely|maybe)\b",
];

/// More distinct markers than this and the answer is sent back.
const MAX_UNCERTAINTY_MARKERS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QualityVerdict {
    Pass,
    /// Send the answer back with this reason.
    Revise(String),
    /// Accept the answer, but log this.
    Note(String),
}

pub struct QualityCheck {
    markers: Vec<Regex>,
}

impl Default for QualityCheck {
    fn default() -> Self {
        Self::new()
    }
}

impl QualityCheck {
    pub fn new() -> Self {
        let markers = UNCERTAINTY_MARKERS
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!(pattern = p, error = %e, "skipping invalid quality marker");
                    None
                }
            })
            .collect();
        Self { markers }
    }

    pub fn check(&self, answer: &str) -> QualityVerdict {
        if answer.trim().is_empty() {
            return QualityVerdict::Revise("Empty response".into());
        }
        if ends_in_bare_refusal(answer) {
            return QualityVerdict::Revise("Response is a refusal with no substance".into());
        }
        let hedges = self.markers.iter().filter(|re| re.is_match(answer)).count();
        if hedges > MAX_UNCERTAINTY_MARKERS {
            return QualityVerdict::Revise(
                "Response hedges too much; state what the results show".into(),
            );
        }
        if answer.matches("```").count() % 2 != 0 {
            return QualityVerdict::Note("Unbalanced code fence".into());
        }
        QualityVerdict::Pass
    }
}

fn ends_in_bare_refusal(answer: &str) -> bool {
    let lower = answer.to_lowercase();
    REFUSAL_PHRASES
        .iter()
        .filter_map(|phrase| lower.find(phrase))
        .any(|at| lower.len() - at < REFUSAL_TAIL_BYTES)
}
