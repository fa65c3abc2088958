//! Tool trait and the startup-built tool lookup table.
//!
//! Tools are external collaborators: each one is registered under a unique
//! name with a declared JSON Schema for its arguments. The registry compiles
//! every schema once at registration, so argument validation at call time is
//! a table lookup plus a validator run, never reflection over the tool.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ToolError;
use crate::message::{MessageToolCall, SessionId};
use crate::provider::ToolDefinition;

/// A request to execute a tool, produced by the model invoker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Call ID (matches the model's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Argument mapping; keys are unique by construction.
    pub arguments: Map<String, Value>,

    /// Index of the assistant turn that requested this call.
    pub turn_index: u64,
}

impl ToolCallRequest {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: Map<String, Value>,
        turn_index: u64,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            turn_index,
        }
    }

    /// Arguments as a JSON object value.
    pub fn arguments_value(&self) -> Value {
        Value::Object(self.arguments.clone())
    }

    pub fn to_message_call(&self) -> MessageToolCall {
        MessageToolCall {
            id: self.id.clone(),
            name: self.name.clone(),
            arguments: Value::Object(self.arguments.clone()).to_string(),
        }
    }
}

/// Why a tool call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ToolErrorKind {
    /// Not allowed, unknown, or stopped by a guardrail.
    ToolDenied,
    /// Arguments do not match the declared schema.
    InvalidArguments,
    /// Execution exceeded its time bound.
    ToolTimeout,
    /// The tool itself failed or panicked.
    ToolExecutionError,
    /// The run was cancelled while the tool was executing.
    Cancelled,
}

impl std::fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ToolDenied => "ToolDenied",
            Self::InvalidArguments => "InvalidArguments",
            Self::ToolTimeout => "ToolTimeout",
            Self::ToolExecutionError => "ToolExecutionError",
            Self::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolFailure {
    pub kind: ToolErrorKind,
    pub message: String,
}

/// The normalized outcome of one tool call. Exactly one is produced per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub call_id: String,

    pub tool_name: String,

    pub success: bool,

    /// Structured return value of the tool (`null` on failure).
    #[serde(default)]
    pub payload: Value,

    /// Text the model reads. Marked with a suffix when cut.
    pub output: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolFailure>,

    pub duration_ms: u64,

    #[serde(default)]
    pub truncated: bool,
}

impl ToolResult {
    pub fn success(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        payload: Value,
        output: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            success: true,
            payload,
            output: output.into(),
            error: None,
            duration_ms,
            truncated: false,
        }
    }

    pub fn failure(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        kind: ToolErrorKind,
        message: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        let message = message.into();
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            success: false,
            payload: Value::Null,
            output: format!("Error ({kind}): {message}"),
            error: Some(ToolFailure { kind, message }),
            duration_ms,
            truncated: false,
        }
    }

    pub fn error_kind(&self) -> Option<ToolErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// The raw value a tool returns on success.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub payload: Value,

    /// Text for the model when the payload's default rendering is not the
    /// right view (e.g. process output kept as plain stdout/stderr).
    pub text: Option<String>,
}

impl ToolOutput {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            text: None,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(Value::String(text.into()))
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Text rendering of the payload for the model. Strings are passed through
    /// verbatim so stdout-style output keeps its exact bytes.
    pub fn render(&self) -> String {
        if let Some(text) = &self.text {
            return text.clone();
        }
        match &self.payload {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            Value::Number(_) | Value::Bool(_) => self.payload.to_string(),
            other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
        }
    }
}

/// Per-call context handed to a tool.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Session the run belongs to; persistent tools key their handles by it.
    pub session_id: SessionId,

    /// Scoped temp area tools may write into.
    pub scratch_dir: PathBuf,
}

/// The core Tool trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "calculator").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with already-validated arguments.
    async fn execute(
        &self,
        ctx: &ToolContext,
        arguments: Value,
    ) -> std::result::Result<ToolOutput, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

struct RegisteredTool {
    tool: Arc<dyn Tool>,
    validator: JSONSchema,
}

/// Lookup table of tools, keyed by name.
///
/// Built at startup and shared read-only afterwards. Iteration order is by
/// name, so tool definitions sent to the model are stable.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, compiling its declared schema.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> std::result::Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolError::DuplicateName(name));
        }

        let schema = tool.parameters_schema();
        let validator =
            JSONSchema::options()
                .compile(&schema)
                .map_err(|e| ToolError::InvalidSchema {
                    tool_name: name.clone(),
                    reason: e.to_string(),
                })?;

        self.tools.insert(name, RegisteredTool { tool, validator });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|t| Arc::clone(&t.tool))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Check arguments against the tool's compiled schema.
    pub fn validate(&self, name: &str, arguments: &Value) -> std::result::Result<(), ToolError> {
        let entry = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        if let Err(errors) = entry.validator.validate(arguments) {
            let message = errors
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ToolError::InvalidArguments(message));
        }
        Ok(())
    }

    /// All tool definitions, ordered by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.tool.to_definition()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
