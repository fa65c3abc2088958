//! `run_python`: runs a Python snippet in the scratch area.
//!
//! The code is written to a fresh file under the scratch directory and run
//! with `python3`. The child is killed if the call is dropped (timeout or
//! cancellation). A non-zero exit is not a tool failure: the model gets the
//! exit code with stdout and stderr exactly as produced.

use std::path::PathBuf;

use async_trait::async_trait;
use runwarden_core::error::ToolError;
use runwarden_core::{Tool, ToolContext, ToolOutput};
use serde_json::{Value, json};
use tokio::process::Command;
use tracing::debug;

pub struct RunPythonTool {
    interpreter: PathBuf,
}

impl RunPythonTool {
    pub fn new() -> Self {
        Self::with_interpreter("python3")
    }

    pub fn with_interpreter(interpreter: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
        }
    }
}

impl Default for RunPythonTool {
    fn default() -> Self {
        Self::new()
    }
}

fn execution_failed(reason: impl std::fmt::Display) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: "run_python".into(),
        reason: reason.to_string(),
    }
}

/// Plain-text view: stdout first, then stderr and a non-zero exit code.
fn render(stdout: &str, stderr: &str, code: i32) -> String {
    let mut text = stdout.to_string();
    if !stderr.is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str("[stderr]\n");
        text.push_str(stderr);
    }
    if code != 0 {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&format!("[exit code: {code}]"));
    }
    text
}

#[async_trait]
impl Tool for RunPythonTool {
    fn name(&self) -> &str {
        "run_python"
    }

    fn description(&self) -> &str {
        "Execute Python code and return stdout, stderr and the exit code. Use for calculations, data processing, or small scripts. Runs in a scratch directory with a time limit; no network access."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "Python source to run, e.g. 'print(2 + 2)'"
                }
            },
            "required": ["code"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, arguments: Value) -> Result<ToolOutput, ToolError> {
        let code = arguments["code"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'code' argument".into()))?;
        if code.trim().is_empty() {
            return Err(ToolError::InvalidArguments("No code provided".into()));
        }

        tokio::fs::create_dir_all(&ctx.scratch_dir)
            .await
            .map_err(execution_failed)?;
        let script = ctx
            .scratch_dir
            .join(format!("snippet-{}.py", uuid::Uuid::new_v4()));
        tokio::fs::write(&script, code)
            .await
            .map_err(execution_failed)?;

        debug!(script = %script.display(), "Running python snippet");
        let output = Command::new(&self.interpreter)
            .arg(&script)
            .current_dir(&ctx.scratch_dir)
            .kill_on_drop(true)
            .output()
            .await;

        if let Err(e) = tokio::fs::remove_file(&script).await {
            debug!(error = %e, "Could not remove python snippet");
        }

        let output = output.map_err(|e| {
            execution_failed(format!(
                "could not start {}: {e}",
                self.interpreter.display()
            ))
        })?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let returncode = output.status.code().unwrap_or(-1);

        let text = render(&stdout, &stderr, returncode);
        Ok(ToolOutput::new(json!({
            "stdout": stdout,
            "stderr": stderr,
            "returncode": returncode,
        }))
        .with_text(text))
    }
}
