//! Context assembly: one ordered message list per model call.
//!
//! Order is fixed:
//!
//! 1. **System** instructions with the run's budget line, never dropped
//! 2. **Retrieved notes**, highest relevance first, ties by most recent
//! 3. **History** in chronological order, oldest dropped first
//! 4. **Latest observations**, never dropped, nearest the next decision
//!
//! Assembly is a pure function of its input: no clock, no randomness, and
//! a total order on every sort, so identical inputs give identical output.

use std::cmp::Ordering;
use std::collections::HashSet;

use runwarden_config::AgentConfig;
use runwarden_core::memory::RetrievedNote;
use runwarden_core::message::{Message, Role, Turn, TurnKind};
use runwarden_core::provider::ToolDefinition;
use serde::{Deserialize, Serialize};

use crate::context::token;
use crate::run_context::RunContext;

/// Token ceiling for an assembled context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBudget {
    pub total: usize,
}

impl Default for TokenBudget {
    fn default() -> Self {
        Self { total: 16_000 }
    }
}

/// Everything one assembly reads.
pub struct AssemblyInput<'a> {
    pub run: &'a RunContext,
    /// Fixed system and developer instructions.
    pub instructions: &'a str,
    /// Extra instruction for this step only, appended to the system message.
    pub hint: Option<&'a str>,
    pub tools: &'a [ToolDefinition],
    pub notes: &'a [RetrievedNote],
    /// Short-term history, oldest first, without the latest observations.
    pub history: &'a [Turn],
    /// Observation turns produced since the last decision.
    pub observations: &'a [Turn],
}

/// The assembled context, ready for a provider call.
#[derive(Debug, Clone)]
pub struct AssembledContext {
    /// System message first, latest observations last.
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub metadata: AssemblyMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssemblyMetadata {
    pub total_tokens: usize,
    pub budget: usize,
    pub per_layer: Vec<LayerStats>,
    pub drops: Vec<DropInfo>,
    /// The protected layers alone exceed the budget.
    pub over_budget: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerStats {
    pub name: String,
    pub tokens: usize,
    pub items_included: usize,
    pub items_total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropInfo {
    pub layer: String,
    pub items_dropped: usize,
    pub tokens_dropped: usize,
    pub reason: String,
}

/// A unit of history that is kept or dropped as a whole: a single turn, or
/// an assistant tool-call turn with the observations answering it.
struct Group {
    messages: Vec<Message>,
    tokens: usize,
    turns: usize,
    protected: bool,
}

/// The context assembler. Stateless; create one and reuse it.
#[derive(Debug, Clone, Default)]
pub struct ContextAssembler {
    budget: TokenBudget,
}

impl ContextAssembler {
    pub fn new(budget: TokenBudget) -> Self {
        Self { budget }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(TokenBudget {
            total: config.context_max_tokens,
        })
    }

    pub fn budget(&self) -> TokenBudget {
        self.budget
    }

    pub fn build(&self, input: &AssemblyInput<'_>) -> AssembledContext {
        let mut stats = Vec::new();
        let mut drops = Vec::new();

        // System
        let mut system_text = format!("{}\n\n{}", input.instructions, input.run.budget_line());
        if let Some(hint) = input.hint {
            system_text.push_str("\n\n");
            system_text.push_str(hint);
        }
        let system = Message::system(system_text);
        let system_tokens = token::estimate_message_tokens(&system);
        stats.push(layer("system", system_tokens, 1, 1));

        // Tool schemas travel with every request
        let tool_tokens = token::estimate_tools_tokens(input.tools);
        stats.push(layer(
            "tool_schemas",
            tool_tokens,
            input.tools.len(),
            input.tools.len(),
        ));

        // Latest observations
        let observation_messages: Vec<Message> =
            input.observations.iter().map(Turn::to_message).collect();
        let observation_tokens = token::estimate_messages_tokens(&observation_messages);
        let answered_late: HashSet<&str> = input
            .observations
            .iter()
            .filter_map(observation_call_id)
            .collect();

        // History groups
        let (mut groups, orphans) = group_history(input.history, &answered_late);
        if orphans > 0 {
            drops.push(DropInfo {
                layer: "history".into(),
                items_dropped: orphans,
                tokens_dropped: 0,
                reason: "Observation without its tool-call turn".into(),
            });
        }
        protect_anchors(&mut groups, !input.observations.is_empty());

        let protected_tokens: usize = groups.iter().filter(|g| g.protected).map(|g| g.tokens).sum();
        let reserved = system_tokens + tool_tokens + observation_tokens + protected_tokens;
        let over_budget = reserved > self.budget.total;
        let mut available = self.budget.total.saturating_sub(reserved);

        // Notes, best first
        let notes = sorted_notes(input.notes);
        let mut note_lines: Vec<(String, usize)> = notes
            .iter()
            .map(|n| {
                let line = format!("- {} (relevance {:.2})\n", n.text, n.relevance);
                let tokens = token::estimate_tokens(&line);
                (line, tokens)
            })
            .collect();
        const NOTES_HEADER: &str = "[Retrieved notes]\n";
        let notes_header_tokens = token::estimate_tokens(NOTES_HEADER) + 4;
        let notes_tokens = |lines: &[(String, usize)]| -> usize {
            if lines.is_empty() {
                0
            } else {
                notes_header_tokens + lines.iter().map(|(_, t)| t).sum::<usize>()
            }
        };

        // Drop oldest unprotected history first
        let mut dropped_turns = 0;
        let mut dropped_history_tokens = 0;
        let droppable_tokens =
            |groups: &[Group]| -> usize { groups.iter().filter(|g| !g.protected).map(|g| g.tokens).sum() };
        while droppable_tokens(&groups) + notes_tokens(&note_lines) > available {
            let Some(pos) = groups.iter().position(|g| !g.protected) else {
                break;
            };
            let group = groups.remove(pos);
            dropped_turns += group.turns;
            dropped_history_tokens += group.tokens;
        }
        if dropped_turns > 0 {
            drops.push(DropInfo {
                layer: "history".into(),
                items_dropped: dropped_turns,
                tokens_dropped: dropped_history_tokens,
                reason: "Oldest turns dropped".into(),
            });
        }
        available = available.saturating_sub(droppable_tokens(&groups));

        // Then the least relevant notes
        let total_notes = note_lines.len();
        let mut dropped_note_tokens = 0;
        while !note_lines.is_empty() && notes_tokens(&note_lines) > available {
            if let Some((_, tokens)) = note_lines.pop() {
                dropped_note_tokens += tokens;
            }
        }
        if note_lines.len() < total_notes {
            drops.push(DropInfo {
                layer: "retrieved_notes".into(),
                items_dropped: total_notes - note_lines.len(),
                tokens_dropped: dropped_note_tokens,
                reason: "Least relevant notes dropped".into(),
            });
        }
        stats.push(layer(
            "retrieved_notes",
            notes_tokens(&note_lines),
            note_lines.len(),
            total_notes,
        ));

        let history_tokens: usize = groups.iter().map(|g| g.tokens).sum();
        let history_turns: usize = groups.iter().map(|g| g.turns).sum();
        stats.push(layer(
            "history",
            history_tokens,
            history_turns,
            input.history.len(),
        ));
        stats.push(layer(
            "observations",
            observation_tokens,
            input.observations.len(),
            input.observations.len(),
        ));

        // Assemble
        let mut messages = vec![system];
        if !note_lines.is_empty() {
            let body: String = note_lines.into_iter().map(|(line, _)| line).collect();
            messages.push(Message::system(format!("{NOTES_HEADER}{body}")));
        }
        messages.extend(groups.into_iter().flat_map(|g| g.messages));
        messages.extend(observation_messages);

        let total_tokens = stats.iter().map(|s| s.tokens).sum();
        if over_budget {
            tracing::debug!(
                total_tokens,
                budget = self.budget.total,
                "Protected context exceeds budget"
            );
        }

        AssembledContext {
            messages,
            tools: input.tools.to_vec(),
            metadata: AssemblyMetadata {
                total_tokens,
                budget: self.budget.total,
                per_layer: stats,
                drops,
                over_budget,
            },
        }
    }
}

fn layer(name: &str, tokens: usize, included: usize, total: usize) -> LayerStats {
    LayerStats {
        name: name.into(),
        tokens,
        items_included: included,
        items_total: total,
    }
}

fn observation_call_id(turn: &Turn) -> Option<&str> {
    match &turn.kind {
        TurnKind::ToolResult { result } => Some(result.call_id.as_str()),
        _ => None,
    }
}

/// Split history into keep-or-drop units. Tool-call turns keep only the calls
/// that have an answer, either in the group or among the late observations,
/// so every rendered call is followed by its result. Returns the groups and
/// the number of orphaned observations skipped.
fn group_history(history: &[Turn], answered_late: &HashSet<&str>) -> (Vec<Group>, usize) {
    let mut groups = Vec::new();
    let mut orphans = 0;
    let mut i = 0;

    while i < history.len() {
        let turn = &history[i];
        match &turn.kind {
            TurnKind::ToolCalls { calls } => {
                let ids: HashSet<&str> = calls.iter().map(|c| c.id.as_str()).collect();
                let mut results = Vec::new();
                let mut j = i + 1;
                while j < history.len() {
                    match observation_call_id(&history[j]) {
                        Some(id) if ids.contains(id) => results.push(&history[j]),
                        _ => break,
                    }
                    j += 1;
                }
                let answered: HashSet<&str> = results
                    .iter()
                    .filter_map(|t| observation_call_id(t))
                    .chain(answered_late.iter().copied())
                    .collect();

                let mut call_message = turn.to_message();
                call_message
                    .tool_calls
                    .retain(|c| answered.contains(c.id.as_str()));

                let mut messages = Vec::new();
                if !call_message.tool_calls.is_empty() || !call_message.content.is_empty() {
                    messages.push(call_message);
                }
                messages.extend(results.iter().map(|t| t.to_message()));
                if !messages.is_empty() {
                    groups.push(Group {
                        tokens: token::estimate_messages_tokens(&messages),
                        messages,
                        turns: j - i,
                        protected: false,
                    });
                }
                i = j;
            }
            TurnKind::ToolResult { .. } => {
                orphans += 1;
                i += 1;
            }
            TurnKind::Text | TurnKind::Clarification => {
                let message = turn.to_message();
                groups.push(Group {
                    tokens: token::estimate_message_tokens(&message),
                    messages: vec![message],
                    turns: 1,
                    protected: false,
                });
                i += 1;
            }
        }
    }

    (groups, orphans)
}

/// Protect the latest user message and, when observations follow, the
/// tool-call group they answer.
fn protect_anchors(groups: &mut [Group], has_observations: bool) {
    if let Some(user) = groups
        .iter_mut()
        .rev()
        .find(|g| g.messages.first().is_some_and(|m| m.role == Role::User))
    {
        user.protected = true;
    }
    if has_observations
        && let Some(last) = groups.last_mut()
        && last
            .messages
            .first()
            .is_some_and(|m| !m.tool_calls.is_empty())
    {
        last.protected = true;
    }
}

/// Highest relevance first, then most recent, then by source for a total order.
fn sorted_notes(notes: &[RetrievedNote]) -> Vec<&RetrievedNote> {
    let mut sorted: Vec<&RetrievedNote> = notes.iter().collect();
    sorted.sort_by(|a, b| {
        b.relevance
            .partial_cmp(&a.relevance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.recorded_at.cmp(&a.recorded_at))
            .then_with(|| a.source.cmp(&b.source))
            .then_with(|| a.text.cmp(&b.text))
    });
    sorted
}
