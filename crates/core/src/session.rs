//! Session registry for long-lived tool resources.
//!
//! Some tools (an interactive shell, a background server) keep a resource
//! open across calls. Those resources are owned by a [`SessionRegistry`]
//! keyed by session id, with explicit acquire and release. The agent loop
//! never touches the handles; a tool looks up the handle for the calling
//! session, and the host releases everything when the session ends.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::ToolError;
use crate::message::SessionId;

/// A resource that can live across tool calls within one session.
#[async_trait]
pub trait SessionHandle: Send + 'static {
    /// Release the underlying resource.
    async fn close(&mut self) -> std::result::Result<(), ToolError>;

    /// Whether the resource can still serve calls.
    fn is_alive(&mut self) -> bool {
        true
    }
}

/// A handle shared between the registry and the call currently using it.
pub type SharedHandle<H> = Arc<Mutex<H>>;

/// Maps session ids to their open handle of type `H`.
pub struct SessionRegistry<H: SessionHandle> {
    handles: Mutex<HashMap<SessionId, SharedHandle<H>>>,
}

impl<H: SessionHandle> SessionRegistry<H> {
    pub fn new() -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Return the open handle for a session, opening a new one when none is
    /// registered or the registered one is no longer alive.
    ///
    /// The boolean is `true` when a new handle was opened.
    pub async fn acquire<F, Fut>(
        &self,
        session_id: &SessionId,
        open: F,
    ) -> std::result::Result<(SharedHandle<H>, bool), ToolError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = std::result::Result<H, ToolError>> + Send,
    {
        // The registry lock is never held while waiting on a handle
        let existing = self.handles.lock().await.get(session_id).cloned();

        if let Some(existing) = existing {
            if existing.lock().await.is_alive() {
                return Ok((existing, false));
            }
            debug!(session_id = %session_id, "Replacing dead session handle");
            let removed = {
                let mut handles = self.handles.lock().await;
                let unchanged = handles
                    .get(session_id)
                    .is_some_and(|current| Arc::ptr_eq(current, &existing));
                if unchanged { handles.remove(session_id) } else { None }
            };
            if let Some(stale) = removed
                && let Err(e) = stale.lock().await.close().await
            {
                warn!(session_id = %session_id, error = %e, "Closing dead session handle failed");
            }
        }

        let handle = Arc::new(Mutex::new(open().await?));
        let raced = {
            let mut handles = self.handles.lock().await;
            let winner = handles.get(session_id).cloned();
            if winner.is_none() {
                handles.insert(session_id.clone(), Arc::clone(&handle));
            }
            winner
        };

        // Another call opened one first: keep theirs, close ours
        if let Some(winner) = raced {
            if let Err(e) = handle.lock().await.close().await {
                warn!(session_id = %session_id, error = %e, "Closing duplicate session handle failed");
            }
            return Ok((winner, false));
        }

        debug!(session_id = %session_id, "Opened session handle");
        Ok((handle, true))
    }

    /// The open handle for a session, if any.
    pub async fn get(&self, session_id: &SessionId) -> Option<SharedHandle<H>> {
        self.handles.lock().await.get(session_id).cloned()
    }

    /// Close and forget the session's handle. Returns `false` if none was open.
    pub async fn release(&self, session_id: &SessionId) -> std::result::Result<bool, ToolError> {
        let handle = self.handles.lock().await.remove(session_id);
        match handle {
            Some(handle) => {
                handle.lock().await.close().await?;
                debug!(session_id = %session_id, "Released session handle");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Close every open handle. Failures are logged; the registry ends empty.
    pub async fn release_all(&self) -> usize {
        let drained: Vec<_> = self.handles.lock().await.drain().collect();
        let count = drained.len();
        for (session_id, handle) in drained {
            if let Err(e) = handle.lock().await.close().await {
                warn!(session_id = %session_id, error = %e, "Failed to close session handle");
            }
        }
        count
    }

    pub async fn len(&self) -> usize {
        self.handles.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.handles.lock().await.is_empty()
    }
}

impl<H: SessionHandle> Default for SessionRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}
