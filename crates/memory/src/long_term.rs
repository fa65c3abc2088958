//! In-process long-term memory with keyword retrieval.
//!
//! Facts belong to the session that wrote them. Retrieval scores each fact
//! as `0.7 * word overlap + 0.3 * importance`, where word overlap is the
//! share of distinct query words found in the fact. Facts with no overlap
//! are not returned; ties go to the most recent fact.
//!
//! Each session keeps at most `max_facts` facts; writing past that evicts
//! the oldest.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use runwarden_core::error::MemoryError;
use runwarden_core::{LongTermMemory, MemoryFact, RetrievedNote, SessionId};
use tokio::sync::RwLock;
use uuid::Uuid;

const OVERLAP_WEIGHT: f32 = 0.7;
const IMPORTANCE_WEIGHT: f32 = 0.3;

/// Per-session fact cap used by [`InMemoryLongTerm::new`].
pub const DEFAULT_MAX_FACTS: usize = 500;

#[derive(Debug, Clone)]
struct StoredFact {
    id: String,
    fact: MemoryFact,
    recorded_at: DateTime<Utc>,
    /// Insertion order; breaks timestamp ties.
    seq: u64,
}

#[derive(Default)]
struct Inner {
    facts: HashMap<SessionId, Vec<StoredFact>>,
    next_seq: u64,
}

pub struct InMemoryLongTerm {
    inner: RwLock<Inner>,
    max_facts: usize,
}

impl Default for InMemoryLongTerm {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLongTerm {
    pub fn new() -> Self {
        Self::with_max_facts(DEFAULT_MAX_FACTS)
    }

    /// A store keeping at most `max_facts` facts per session (minimum 1).
    pub fn with_max_facts(max_facts: usize) -> Self {
        Self {
            inner: RwLock::default(),
            max_facts: max_facts.max(1),
        }
    }

    /// Number of facts stored for a session.
    pub async fn count(&self, session_id: &SessionId) -> usize {
        self.inner
            .read()
            .await
            .facts
            .get(session_id)
            .map_or(0, Vec::len)
    }
}

fn words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 1)
        .map(str::to_lowercase)
        .collect()
}

fn score(query_words: &HashSet<String>, fact: &MemoryFact) -> Option<f32> {
    if query_words.is_empty() {
        return None;
    }
    let fact_words = words(&fact.content);
    let hits = query_words.iter().filter(|w| fact_words.contains(*w)).count();
    if hits == 0 {
        return None;
    }
    let overlap = hits as f32 / query_words.len() as f32;
    Some(OVERLAP_WEIGHT * overlap + IMPORTANCE_WEIGHT * fact.importance.clamp(0.0, 1.0))
}

#[async_trait]
impl LongTermMemory for InMemoryLongTerm {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn write(&self, session_id: &SessionId, fact: MemoryFact) -> Result<String, MemoryError> {
        if fact.content.trim().is_empty() {
            return Err(MemoryError::Storage("refusing to store an empty fact".into()));
        }
        let id = Uuid::new_v4().to_string();
        let mut inner = self.inner.write().await;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        let facts = inner.facts.entry(session_id.clone()).or_default();
        facts.push(StoredFact {
            id: id.clone(),
            fact,
            recorded_at: Utc::now(),
            seq,
        });
        if facts.len() > self.max_facts {
            let evicted = facts.len() - self.max_facts;
            facts.drain(..evicted);
            tracing::debug!(session_id = %session_id, evicted, "Evicted oldest long-term facts");
        }
        Ok(id)
    }

    async fn retrieve(
        &self,
        session_id: &SessionId,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedNote>, MemoryError> {
        let inner = self.inner.read().await;
        let Some(facts) = inner.facts.get(session_id) else {
            return Ok(Vec::new());
        };
        let query_words = words(query);

        let mut scored: Vec<(f32, &StoredFact)> = facts
            .iter()
            .filter_map(|stored| score(&query_words, &stored.fact).map(|s| (s, stored)))
            .collect();

        scored.sort_by(|(sa, a), (sb, b)| {
            sb.total_cmp(sa)
                .then_with(|| b.recorded_at.cmp(&a.recorded_at))
                .then_with(|| b.seq.cmp(&a.seq))
        });
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(relevance, stored)| RetrievedNote {
                text: stored.fact.content.clone(),
                relevance,
                source: stored.id.clone(),
                recorded_at: stored.recorded_at,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact(content: &str, importance: f32) -> MemoryFact {
        MemoryFact {
            content: content.into(),
            category: "fact".into(),
            importance,
            origin: None,
        }
    }

    #[tokio::test]
    async fn retrieves_by_word_overlap() {
        let mem = InMemoryLongTerm::new();
        let s = SessionId::from("s");
        mem.write(&s, fact("The user prefers metric units", 0.8)).await.unwrap();
        mem.write(&s, fact("Rust is a systems language", 0.5)).await.unwrap();

        let notes = mem.retrieve(&s, "which units does the user prefer", 5).await.unwrap();
        assert_eq!(notes.len(), 1);
        assert!(notes[0].text.contains("metric"));
        assert!(notes[0].relevance > 0.0 && notes[0].relevance <= 1.0);
    }

    #[tokio::test]
    async fn importance_breaks_equal_overlap() {
        let mem = InMemoryLongTerm::new();
        let s = SessionId::from("s");
        mem.write(&s, fact("deploy target is staging", 0.3)).await.unwrap();
        mem.write(&s, fact("deploy target is production", 0.8)).await.unwrap();

        let notes = mem.retrieve(&s, "deploy target", 5).await.unwrap();
        assert_eq!(notes.len(), 2);
        assert!(notes[0].text.contains("production"));
    }

    #[tokio::test]
    async fn ties_prefer_most_recent() {
        let mem = InMemoryLongTerm::new();
        let s = SessionId::from("s");
        mem.write(&s, fact("build passed on monday", 0.5)).await.unwrap();
        mem.write(&s, fact("build passed on tuesday", 0.5)).await.unwrap();

        let notes = mem.retrieve(&s, "build passed", 1).await.unwrap();
        assert_eq!(notes.len(), 1);
        assert!(notes[0].text.contains("tuesday"));
    }

    #[tokio::test]
    async fn facts_are_session_scoped() {
        let mem = InMemoryLongTerm::new();
        mem.write(&SessionId::from("a"), fact("alpha secret plan", 0.5))
            .await
            .unwrap();
        let notes = mem.retrieve(&SessionId::from("b"), "alpha plan", 5).await.unwrap();
        assert!(notes.is_empty());
        assert_eq!(mem.count(&SessionId::from("a")).await, 1);
    }

    #[tokio::test]
    async fn oldest_facts_evicted_past_cap() {
        let mem = InMemoryLongTerm::with_max_facts(3);
        let s = SessionId::from("s");
        for day in ["monday", "tuesday", "wednesday", "thursday", "friday"] {
            mem.write(&s, fact(&format!("standup held on {day}"), 0.5)).await.unwrap();
        }
        assert_eq!(mem.count(&s).await, 3);

        let notes = mem.retrieve(&s, "standup held", 10).await.unwrap();
        let kept: Vec<&str> = notes.iter().map(|n| n.text.as_str()).collect();
        assert_eq!(
            kept,
            vec!["standup held on friday", "standup held on thursday", "standup held on wednesday"]
        );

        // The cap is per session
        mem.write(&SessionId::from("other"), fact("standup held on saturday", 0.5))
            .await
            .unwrap();
        assert_eq!(mem.count(&s).await, 3);
    }

    #[tokio::test]
    async fn empty_fact_rejected() {
        let mem = InMemoryLongTerm::new();
        assert!(mem.write(&SessionId::from("a"), fact("   ", 0.5)).await.is_err());
    }
}
