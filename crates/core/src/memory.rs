//! Memory collaborator contracts.
//!
//! Short-term memory is the per-session ordered history of turns. Long-term
//! memory holds facts across runs; the core only writes facts the write
//! policy selects and reads back a ranked snapshot at the start of each run.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MemoryError;
use crate::message::{Role, SessionId, Turn, TurnKind};

/// A long-term fact surfaced for one run. Read-only for the run's duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedNote {
    pub text: String,

    /// Relevance to the current query, 0.0 to 1.0.
    pub relevance: f32,

    /// Identifier of the stored fact.
    pub source: String,

    /// When the fact was recorded; newer wins relevance ties.
    pub recorded_at: DateTime<Utc>,
}

/// A fact the write policy wants persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryFact {
    pub content: String,

    /// Category label such as "preference", "fact" or "outcome".
    pub category: String,

    /// 0.0 to 1.0; feeds retrieval scoring.
    pub importance: f32,

    /// Tool or turn the fact came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

/// Ordered per-session history with a bounded retained length.
#[async_trait]
pub trait ShortTermMemory: Send + Sync {
    /// Append a turn, assigning the next sequence index for the session.
    async fn append(
        &self,
        session_id: &SessionId,
        role: Role,
        content: String,
        kind: TurnKind,
    ) -> std::result::Result<Turn, MemoryError>;

    /// The index the next appended turn of the session will receive.
    async fn next_index(&self, session_id: &SessionId) -> std::result::Result<u64, MemoryError>;

    /// Retained turns for the session, oldest first.
    async fn recent(&self, session_id: &SessionId) -> std::result::Result<Vec<Turn>, MemoryError>;

    /// Drop all turns of a session.
    async fn clear(&self, session_id: &SessionId) -> std::result::Result<(), MemoryError>;
}

/// Cross-run fact store with retrieval.
#[async_trait]
pub trait LongTermMemory: Send + Sync {
    fn name(&self) -> &str;

    async fn write(
        &self,
        session_id: &SessionId,
        fact: MemoryFact,
    ) -> std::result::Result<String, MemoryError>;

    async fn retrieve(
        &self,
        session_id: &SessionId,
        query: &str,
        top_k: usize,
    ) -> std::result::Result<Vec<RetrievedNote>, MemoryError>;
}
