//! Tool execution for runwarden.
//!
//! The [`ToolPipeline`] is the only path by which a model-requested tool
//! call runs. The built-in tools give the agent exact arithmetic, a Python
//! sandbox, persistent shell sessions, and background servers it can stop.

pub mod calculator;
pub mod echo;
pub mod pipeline;
pub mod python;
pub mod server;
pub mod shell;

use std::sync::Arc;

use runwarden_core::error::ToolError;
use runwarden_core::{SessionId, ToolRegistry};

pub use pipeline::{TRUNCATION_MARKER, ToolPipeline};
pub use server::{ServerGroup, ServerSessions};
pub use shell::{ShellSession, ShellSessions};

/// Session-scoped resources held by stateful tools.
///
/// Cleanup is session-scoped: a run ending does not close anything, the
/// host releases a session's resources when the session ends.
#[derive(Clone, Default)]
pub struct SessionResources {
    shells: ShellSessions,
    servers: ServerSessions,
}

impl SessionResources {
    pub fn shells(&self) -> &ShellSessions {
        &self.shells
    }

    pub fn servers(&self) -> &ServerSessions {
        &self.servers
    }

    /// Close every resource a session holds. Returns how many were closed.
    pub async fn release_session(&self, session_id: &SessionId) -> usize {
        let outcomes = [
            ("shell", self.shells.release(session_id).await),
            ("servers", self.servers.release(session_id).await),
        ];
        let mut released = 0;
        for (kind, outcome) in outcomes {
            match outcome {
                Ok(true) => released += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(session_id = %session_id, kind, error = %e, "Failed to release session resource");
                }
            }
        }
        released
    }

    /// Close everything, for shutdown.
    pub async fn release_all(&self) -> usize {
        self.shells.release_all().await + self.servers.release_all().await
    }
}

/// Registry with every built-in tool, plus the resources its stateful
/// tools share.
pub fn default_registry() -> Result<(ToolRegistry, SessionResources), ToolError> {
    let resources = SessionResources::default();
    let shells = resources.shells().clone();
    let servers = resources.servers().clone();

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(calculator::CalculatorTool))?;
    registry.register(Arc::new(echo::EchoTool))?;
    registry.register(Arc::new(python::RunPythonTool::new()))?;
    registry.register(Arc::new(shell::OpenShellTool::new(shells.clone())))?;
    registry.register(Arc::new(shell::RunShellCommandTool::new(shells.clone())))?;
    registry.register(Arc::new(shell::CloseShellTool::new(shells)))?;
    registry.register(Arc::new(server::StartServerTool::new(servers.clone())))?;
    registry.register(Arc::new(server::StopServerTool::new(servers)))?;
    Ok((registry, resources))
}
