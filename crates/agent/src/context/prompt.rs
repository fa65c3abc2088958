//! Instruction text for the model.
//!
//! The system prompt is fixed for a loop instance. The repair and
//! forced-answer instructions are appended by the invoker only for the
//! attempts that need them.

use runwarden_config::AppConfig;
use runwarden_core::provider::ToolDefinition;

/// Prefix the model uses to ask the user a clarifying question.
pub const CLARIFY_MARKER: &str = "CLARIFY:";

/// Build the system prompt for an agent.
///
/// A configured `agent.system_prompt` replaces the built-in persona; the
/// operating rules about tools, clarifications and budgets are always kept.
pub fn system_prompt(config: &AppConfig, tools: &[ToolDefinition]) -> String {
    let persona = config.agent.system_prompt.clone().unwrap_or_else(|| {
        format!(
            "You are {}, a careful assistant that solves the user's task correctly \
             and efficiently. If you do not know something, say so. Only claim an \
             action happened when a tool result confirms it.",
            config.agent.name
        )
    });

    let mut parts = vec![persona, String::new(), "Rules:".to_string()];
    parts.push(
        "- Use a tool whenever it makes the answer more reliable. Always use the \
         calculator tool for arithmetic instead of computing it yourself."
            .into(),
    );
    parts.push("- Never invent tool results. If a tool fails, adapt: fix the arguments, pick another tool, or answer without it.".into());
    parts.push(format!(
        "- If the request is ambiguous and you cannot proceed, reply with a single \
         question that starts with `{CLARIFY_MARKER}`. Do not ask when a reasonable \
         assumption works."
    ));
    parts.push(format!(
        "- You may make at most {} tool calls and must finish within {} seconds.",
        config.budget.max_tool_calls, config.budget.max_time_seconds
    ));
    parts.push("- Never reveal or store secrets such as API keys or passwords.".into());
    parts.push("- Be concise and structured in the final answer.".into());

    if !tools.is_empty() {
        parts.push(String::new());
        parts.push("Available tools:".into());
        for tool in tools {
            parts.push(format!("- {}: {}", tool.name, tool.description));
        }
    }

    parts.join("\n")
}

/// Stricter instruction sent after a malformed reply.
pub fn repair_instruction(reason: &str, attempt: u32) -> String {
    let mut lines = vec![
        format!("Your previous reply could not be used: {reason}"),
        "Reply again with exactly one of:".to_string(),
        "1. tool calls using the exact tool names and a JSON object of arguments matching the tool's schema,".to_string(),
        format!("2. a single clarifying question starting with `{CLARIFY_MARKER}`,"),
        "3. the final answer as plain text.".to_string(),
    ];
    if attempt > 1 {
        lines.push("Previous corrections also failed. Keep the reply minimal.".into());
    }
    lines.join("\n")
}

/// Instruction used once the clarification ceiling is reached.
pub const FORCE_ANSWER_INSTRUCTION: &str = "You have already asked the user for clarification \
and must not ask again. Give your best final answer now from what is known, stating any \
assumptions you make. Do not call tools and do not ask questions.";

/// Instruction sent with a final answer that failed review.
pub fn quality_feedback(reason: &str, draft: &str) -> String {
    format!(
        "Quality check failed: {reason}. Please fix. Your previous draft answer was:\n{draft}"
    )
}

/// Instruction for the turn after tool observations arrive.
pub const SYNTHESIZE_HINT: &str = "Use the tool results above to answer the user. Call more \
tools only if they are strictly necessary.";
