//! Echo tool: returns its message unchanged.

use async_trait::async_trait;
use runwarden_core::error::ToolError;
use runwarden_core::{Tool, ToolContext, ToolOutput};
use serde_json::{Value, json};

pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo a message back unchanged. Useful for testing tool use."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": {"type": "string", "description": "Message to echo"}
            },
            "required": ["message"]
        })
    }

    async fn execute(&self, _ctx: &ToolContext, arguments: Value) -> Result<ToolOutput, ToolError> {
        let message = arguments["message"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'message' argument".into()))?;
        Ok(ToolOutput::text(message))
    }
}
