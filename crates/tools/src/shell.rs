//! Persistent shell sessions: `open_shell`, `run_shell_command`, `close_shell`.
//!
//! Each session owns at most one `sh` process, held in a
//! [`SessionRegistry`]. stderr is merged into stdout inside the shell, and
//! every command is followed by an end marker carrying its exit status so
//! the reader knows where the command's output stops.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use runwarden_core::error::ToolError;
use runwarden_core::{SessionHandle, SessionRegistry, Tool, ToolContext, ToolOutput};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info};

const END_MARKER: &str = "__RUNWARDEN_END__";

/// Open shells keyed by session.
pub type ShellSessions = Arc<SessionRegistry<ShellSession>>;

fn shell_error(tool: &str, reason: impl std::fmt::Display) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: tool.into(),
        reason: reason.to_string(),
    }
}

/// One long-lived `sh` process.
pub struct ShellSession {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    /// Set while a command is in flight. A call dropped mid-command leaves
    /// it set, and the unread output makes the session unusable.
    busy: bool,
}

impl ShellSession {
    /// Start `sh` in `cwd` with stderr merged into stdout.
    pub async fn spawn(cwd: &Path) -> Result<Self, ToolError> {
        tokio::fs::create_dir_all(cwd)
            .await
            .map_err(|e| shell_error("open_shell", e))?;

        let mut child = Command::new("sh")
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| shell_error("open_shell", format!("could not start sh: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| shell_error("open_shell", "shell stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| shell_error("open_shell", "shell stdout unavailable"))?;

        let mut session = Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            busy: false,
        };
        session.run("exec 2>&1").await?;
        Ok(session)
    }

    /// Run one command and return its combined output and exit status.
    pub async fn run(&mut self, command: &str) -> Result<(String, i32), ToolError> {
        self.busy = true;
        let script = format!("{}\necho \"{END_MARKER}$?\"\n", command.trim_end());
        self.stdin
            .write_all(script.as_bytes())
            .await
            .map_err(|e| shell_error("run_shell_command", e))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| shell_error("run_shell_command", e))?;

        let mut output = String::new();
        let mut line = String::new();
        loop {
            line.clear();
            let read = self
                .stdout
                .read_line(&mut line)
                .await
                .map_err(|e| shell_error("run_shell_command", e))?;
            if read == 0 {
                return Err(shell_error(
                    "run_shell_command",
                    format!("shell exited before the command finished; output so far:\n{output}"),
                ));
            }
            if let Some(pos) = line.find(END_MARKER) {
                output.push_str(&line[..pos]);
                let status = line[pos + END_MARKER.len()..].trim().parse().unwrap_or(-1);
                self.busy = false;
                return Ok((output, status));
            }
            output.push_str(&line);
        }
    }
}

#[async_trait]
impl SessionHandle for ShellSession {
    async fn close(&mut self) -> Result<(), ToolError> {
        if matches!(self.child.try_wait(), Ok(Some(_))) {
            return Ok(());
        }
        self.child
            .kill()
            .await
            .map_err(|e| shell_error("close_shell", e))
    }

    fn is_alive(&mut self) -> bool {
        !self.busy && matches!(self.child.try_wait(), Ok(None))
    }
}

pub struct OpenShellTool {
    sessions: ShellSessions,
}

impl OpenShellTool {
    pub fn new(sessions: ShellSessions) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl Tool for OpenShellTool {
    fn name(&self) -> &str {
        "open_shell"
    }

    fn description(&self) -> &str {
        "Open a persistent shell for this session. Use run_shell_command to run commands in it and close_shell when done. State such as the working directory carries over between commands."
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, ctx: &ToolContext, _arguments: Value) -> Result<ToolOutput, ToolError> {
        let scratch = ctx.scratch_dir.clone();
        let (_, opened) = self
            .sessions
            .acquire(&ctx.session_id, || async move { ShellSession::spawn(&scratch).await })
            .await?;
        if opened {
            info!(session_id = %ctx.session_id, "Opened shell session");
            Ok(ToolOutput::text(
                "Shell opened. Use run_shell_command to run commands, close_shell to close it.",
            ))
        } else {
            Ok(ToolOutput::text("Shell already open for this session."))
        }
    }
}

pub struct RunShellCommandTool {
    sessions: ShellSessions,
}

impl RunShellCommandTool {
    pub fn new(sessions: ShellSessions) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl Tool for RunShellCommandTool {
    fn name(&self) -> &str {
        "run_shell_command"
    }

    fn description(&self) -> &str {
        "Run a command in this session's open shell and return its combined output and exit code. Call open_shell first."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {"type": "string", "description": "The shell command to run"}
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, arguments: Value) -> Result<ToolOutput, ToolError> {
        let command = arguments["command"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'command' argument".into()))?;

        let handle = self
            .sessions
            .get(&ctx.session_id)
            .await
            .ok_or_else(|| ToolError::SessionNotOpen(ctx.session_id.to_string()))?;
        let mut shell = handle.lock().await;
        if !shell.is_alive() {
            return Err(shell_error(
                "run_shell_command",
                "the shell is no longer usable; call open_shell again",
            ));
        }

        debug!(session_id = %ctx.session_id, "Running shell command");
        let (output, status) = shell.run(command).await?;
        let mut text = output.clone();
        if status != 0 {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&format!("[exit code: {status}]"));
        }
        Ok(ToolOutput::new(json!({"output": output, "exit_code": status})).with_text(text))
    }
}

pub struct CloseShellTool {
    sessions: ShellSessions,
}

impl CloseShellTool {
    pub fn new(sessions: ShellSessions) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl Tool for CloseShellTool {
    fn name(&self) -> &str {
        "close_shell"
    }

    fn description(&self) -> &str {
        "Close this session's persistent shell. It does not stop servers started with start_server; use stop_server for those."
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, ctx: &ToolContext, _arguments: Value) -> Result<ToolOutput, ToolError> {
        if self.sessions.release(&ctx.session_id).await? {
            info!(session_id = %ctx.session_id, "Closed shell session");
            Ok(ToolOutput::text("Shell closed."))
        } else {
            Ok(ToolOutput::text("No shell was open."))
        }
    }
}
