//! Token estimation utilities.
//!
//! Character heuristic: about 4 characters per token, rounded up. Used to
//! keep assembled context under its ceiling and to charge the governor
//! when a provider reports no usage.

use runwarden_core::message::Message;
use runwarden_core::provider::{ToolDefinition, Usage};

/// Per-message overhead for role name and delimiters on the wire.
const MESSAGE_OVERHEAD: usize = 4;

/// Estimate the token count for a string.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Estimate tokens for one message, including requested tool calls.
pub fn estimate_message_tokens(message: &Message) -> usize {
    let calls: usize = message
        .tool_calls
        .iter()
        .map(|c| estimate_tokens(&c.name) + estimate_tokens(&c.arguments))
        .sum();
    MESSAGE_OVERHEAD + estimate_tokens(&message.content) + calls
}

pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

/// Estimate tokens for a tool definition (serialized as JSON).
pub fn estimate_tool_tokens(tool: &ToolDefinition) -> usize {
    let json = serde_json::to_string(tool).unwrap_or_default();
    estimate_tokens(&json)
}

pub fn estimate_tools_tokens(tools: &[ToolDefinition]) -> usize {
    tools.iter().map(estimate_tool_tokens).sum()
}

/// Usage for a round trip the provider did not account for.
pub fn estimate_usage(prompt: &[Message], tools: &[ToolDefinition], reply: &Message) -> Usage {
    let prompt_tokens = estimate_messages_tokens(prompt) + estimate_tools_tokens(tools);
    let completion_tokens = estimate_message_tokens(reply);
    let prompt_tokens = u32::try_from(prompt_tokens).unwrap_or(u32::MAX);
    let completion_tokens = u32::try_from(completion_tokens).unwrap_or(u32::MAX);
    Usage {
        prompt_tokens,
        completion_tokens,
        total_tokens: prompt_tokens.saturating_add(completion_tokens),
        cost: None,
    }
}
