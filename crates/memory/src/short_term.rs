//! In-process short-term memory.
//!
//! Each session keeps at most `max_turns` turns; the oldest is evicted
//! first. Sequence indices are assigned per session and keep increasing
//! across evictions, so a retained turn's index never changes.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use runwarden_core::error::MemoryError;
use runwarden_core::{Role, SessionId, ShortTermMemory, Turn, TurnKind};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct SessionHistory {
    turns: VecDeque<Turn>,
    next_index: u64,
}

pub struct InMemoryShortTerm {
    max_turns: usize,
    sessions: RwLock<HashMap<SessionId, SessionHistory>>,
}

impl InMemoryShortTerm {
    pub fn new(max_turns: usize) -> Self {
        Self {
            max_turns: max_turns.max(1),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }
}

impl Default for InMemoryShortTerm {
    fn default() -> Self {
        Self::new(20)
    }
}

#[async_trait]
impl ShortTermMemory for InMemoryShortTerm {
    async fn append(
        &self,
        session_id: &SessionId,
        role: Role,
        content: String,
        kind: TurnKind,
    ) -> Result<Turn, MemoryError> {
        let mut sessions = self.sessions.write().await;
        let history = sessions.entry(session_id.clone()).or_default();

        let turn = Turn {
            index: history.next_index,
            role,
            content,
            kind,
        };
        history.next_index += 1;
        history.turns.push_back(turn.clone());
        while history.turns.len() > self.max_turns {
            history.turns.pop_front();
        }
        Ok(turn)
    }

    async fn next_index(&self, session_id: &SessionId) -> Result<u64, MemoryError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(session_id).map_or(0, |h| h.next_index))
    }

    async fn recent(&self, session_id: &SessionId) -> Result<Vec<Turn>, MemoryError> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(session_id)
            .map(|h| h.turns.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn clear(&self, session_id: &SessionId) -> Result<(), MemoryError> {
        self.sessions.write().await.remove(session_id);
        Ok(())
    }
}
