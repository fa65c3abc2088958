//! No-op long-term memory: stores nothing, retrieves nothing.

use async_trait::async_trait;
use runwarden_core::error::MemoryError;
use runwarden_core::{LongTermMemory, MemoryFact, RetrievedNote, SessionId};

pub struct NoopLongTerm;

#[async_trait]
impl LongTermMemory for NoopLongTerm {
    fn name(&self) -> &str {
        "none"
    }

    async fn write(&self, _session_id: &SessionId, _fact: MemoryFact) -> Result<String, MemoryError> {
        Ok(String::new())
    }

    async fn retrieve(
        &self,
        _session_id: &SessionId,
        _query: &str,
        _top_k: usize,
    ) -> Result<Vec<RetrievedNote>, MemoryError> {
        Ok(Vec::new())
    }
}
