//! Long-running servers: `start_server` and `stop_server`.
//!
//! A server is a background process the model starts for a session and
//! names by the port it listens on. Each session's servers live in a
//! [`ServerGroup`] held by a [`SessionRegistry`], so `stop_server` can only
//! stop a process this session started, and releasing the session stops
//! whatever is still running.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use runwarden_core::error::ToolError;
use runwarden_core::{SessionHandle, SessionRegistry, Tool, ToolContext, ToolOutput};
use serde_json::{Value, json};
use tokio::process::{Child, Command};
use tracing::{info, warn};

/// Server groups keyed by session.
pub type ServerSessions = Arc<SessionRegistry<ServerGroup>>;

fn server_error(tool: &str, reason: impl std::fmt::Display) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: tool.into(),
        reason: reason.to_string(),
    }
}

fn port_argument(arguments: &Value) -> Result<u16, ToolError> {
    arguments["port"]
        .as_u64()
        .and_then(|p| u16::try_from(p).ok())
        .filter(|p| *p > 0)
        .ok_or_else(|| ToolError::InvalidArguments("'port' must be 1-65535".into()))
}

/// A server process started by `start_server`.
pub struct ServerProcess {
    child: Child,
    pid: Option<u32>,
}

impl ServerProcess {
    async fn spawn(command: &str, ctx: &ToolContext) -> Result<Self, ToolError> {
        tokio::fs::create_dir_all(&ctx.scratch_dir)
            .await
            .map_err(|e| server_error("start_server", e))?;

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&ctx.scratch_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd
            .spawn()
            .map_err(|e| server_error("start_server", format!("could not start server: {e}")))?;
        let pid = child.id();
        Ok(Self { child, pid })
    }

    fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Stop the process and everything it spawned.
    async fn stop(&mut self) -> Result<(), ToolError> {
        if !self.is_running() {
            return Ok(());
        }
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            // The server runs in its own process group; signal all of it
            let _ = Command::new("kill")
                .args(["-TERM", "--", &format!("-{pid}")])
                .status()
                .await;
        }
        if self.is_running() {
            self.child
                .kill()
                .await
                .map_err(|e| server_error("stop_server", e))?;
        } else {
            let _ = self.child.wait().await;
        }
        Ok(())
    }
}

/// The servers one session has started, by port.
#[derive(Default)]
pub struct ServerGroup {
    servers: BTreeMap<u16, ServerProcess>,
}

impl ServerGroup {
    pub fn ports(&self) -> Vec<u16> {
        self.servers.keys().copied().collect()
    }
}

#[async_trait]
impl SessionHandle for ServerGroup {
    async fn close(&mut self) -> Result<(), ToolError> {
        let mut first_error = None;
        while let Some((port, mut server)) = self.servers.pop_first() {
            if let Err(e) = server.stop().await {
                warn!(port, error = %e, "Failed to stop server");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

pub struct StartServerTool {
    sessions: ServerSessions,
}

impl StartServerTool {
    pub fn new(sessions: ServerSessions) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl Tool for StartServerTool {
    fn name(&self) -> &str {
        "start_server"
    }

    fn description(&self) -> &str {
        "Start a long-running server (e.g. `python app.py` for a Flask app on 5000) in the background, in the scratch directory. Give the port it listens on; stop it later with stop_server and that port."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {"type": "string", "description": "Shell command that runs the server in the foreground"},
                "port": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": 65535,
                    "description": "Port the server listens on"
                }
            },
            "required": ["command", "port"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, arguments: Value) -> Result<ToolOutput, ToolError> {
        let command = arguments["command"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'command' argument".into()))?;
        let port = port_argument(&arguments)?;

        let (group, _) = self
            .sessions
            .acquire(&ctx.session_id, || async { Ok(ServerGroup::default()) })
            .await?;
        let mut group = group.lock().await;
        if let Some(existing) = group.servers.get_mut(&port)
            && existing.is_running()
        {
            return Err(server_error(
                "start_server",
                format!("a server this session started is already running on port {port}"),
            ));
        }

        let server = ServerProcess::spawn(command, ctx).await?;
        let pid = server.pid;
        group.servers.insert(port, server);
        info!(session_id = %ctx.session_id, port, ?pid, "Started server");

        Ok(ToolOutput::new(json!({"port": port, "pid": pid}))
            .with_text(format!("Server started on port {port}. Stop it with stop_server.")))
    }
}

pub struct StopServerTool {
    sessions: ServerSessions,
}

impl StopServerTool {
    pub fn new(sessions: ServerSessions) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl Tool for StopServerTool {
    fn name(&self) -> &str {
        "stop_server"
    }

    fn description(&self) -> &str {
        "Stop a server this session started with start_server, by its port. Use this rather than close_shell to stop servers."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "port": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": 65535,
                    "description": "Port the server listens on"
                }
            },
            "required": ["port"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, arguments: Value) -> Result<ToolOutput, ToolError> {
        let port = port_argument(&arguments)?;
        let not_ours = || {
            ToolError::NotPermitted(format!(
                "no server started by this session is recorded on port {port}"
            ))
        };

        let group = self.sessions.get(&ctx.session_id).await.ok_or_else(not_ours)?;
        let mut server = group.lock().await.servers.remove(&port).ok_or_else(not_ours)?;
        let was_running = server.is_running();
        server.stop().await?;
        info!(session_id = %ctx.session_id, port, pid = ?server.pid, "Stopped server");

        let text = if was_running {
            format!("Stopped the server on port {port}.")
        } else {
            format!("The server on port {port} had already exited.")
        };
        Ok(ToolOutput::new(json!({"port": port, "pid": server.pid, "was_running": was_running}))
            .with_text(text))
    }
}
