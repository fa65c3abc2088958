//! Message and Turn domain types.
//!
//! A [`Turn`] is what the loop records in history: one user, assistant or tool
//! exchange with a strictly increasing sequence index. A [`Message`] is the
//! wire-neutral form handed to a provider. Messages carry no ids or
//! timestamps, so assembling the same turns always yields identical messages.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tool::{ToolCallRequest, ToolResult};

/// Identifier of a session (a sequence of runs sharing short-term history).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The model
    Assistant,
    /// System and developer instructions
    System,
    /// Tool observation
    Tool,
}

/// A single message sent to a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,

    pub content: String,

    /// Tool calls requested by the assistant (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<MessageToolCall>,

    /// If this is a tool result, which tool call it responds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::plain(Role::Tool, content)
        }
    }
}

/// A tool call as the provider reports it: arguments are still raw JSON text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageToolCall {
    /// Unique ID for this tool call
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as JSON string
    pub arguments: String,
}

/// What a turn records beyond its text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnKind {
    /// Plain user or assistant text.
    Text,
    /// The assistant asked the user a clarifying question.
    Clarification,
    /// The assistant requested tool calls.
    ToolCalls { calls: Vec<ToolCallRequest> },
    /// A tool observation.
    ToolResult { result: ToolResult },
}

/// One exchange unit in history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Sequence index, strictly increasing within a session.
    pub index: u64,
    pub role: Role,
    pub content: String,
    pub kind: TurnKind,
}

impl Turn {
    pub fn user(index: u64, content: impl Into<String>) -> Self {
        Self {
            index,
            role: Role::User,
            content: content.into(),
            kind: TurnKind::Text,
        }
    }

    pub fn assistant(index: u64, content: impl Into<String>) -> Self {
        Self {
            index,
            role: Role::Assistant,
            content: content.into(),
            kind: TurnKind::Text,
        }
    }

    pub fn clarification(index: u64, question: impl Into<String>) -> Self {
        Self {
            index,
            role: Role::Assistant,
            content: question.into(),
            kind: TurnKind::Clarification,
        }
    }

    pub fn tool_calls(index: u64, thought: impl Into<String>, calls: Vec<ToolCallRequest>) -> Self {
        Self {
            index,
            role: Role::Assistant,
            content: thought.into(),
            kind: TurnKind::ToolCalls { calls },
        }
    }

    pub fn observation(index: u64, result: ToolResult) -> Self {
        Self {
            index,
            role: Role::Tool,
            content: result.output.clone(),
            kind: TurnKind::ToolResult { result },
        }
    }

    pub fn is_clarification(&self) -> bool {
        matches!(self.kind, TurnKind::Clarification)
    }

    pub fn is_observation(&self) -> bool {
        matches!(self.kind, TurnKind::ToolResult { .. })
    }

    /// Render the turn as a provider message.
    pub fn to_message(&self) -> Message {
        match &self.kind {
            TurnKind::Text | TurnKind::Clarification => Message::plain(self.role, &self.content),
            TurnKind::ToolCalls { calls } => Message {
                tool_calls: calls.iter().map(ToolCallRequest::to_message_call).collect(),
                ..Message::assistant(&self.content)
            },
            TurnKind::ToolResult { result } => Message::tool_result(&result.call_id, &self.content),
        }
    }
}
