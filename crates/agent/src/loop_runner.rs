//! The agent loop: decide, act, observe, under a budget.
//!
//! ```text
//! Start -> Deciding -> ExecutingTools -> Deciding -> ...
//!                  \-> AskingClarification | FinalAnswer | GracefulStop
//! ```
//!
//! Iterations run strictly one after another. The governor is consulted at
//! the top of every iteration and before every tool call, and every exit
//! path produces a readable [`RunResult`].

use std::sync::Arc;

use runwarden_config::AppConfig;
use runwarden_core::error::ModelError;
use runwarden_core::memory::RetrievedNote;
use runwarden_core::{
    BudgetKind, Decision, LongTermMemory, Provider, Role, RunRequest, RunResult, RunStep,
    SessionId, ShortTermMemory, TerminationReason, ToolCallRequest, ToolContext, ToolErrorKind,
    ToolRegistry, ToolResult, Turn, TurnKind,
};
use runwarden_memory::{InMemoryLongTerm, InMemoryShortTerm, MemoryWritePolicy, NoopLongTerm};
use runwarden_providers::TaskSignal;
use runwarden_security::{Refusal, RequestPolicy};
use runwarden_telemetry::{BudgetCeilings, BudgetGovernor, Checkpoint};
use runwarden_tools::ToolPipeline;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::prompt::{self, SYNTHESIZE_HINT};
use crate::context::{AssemblyInput, ContextAssembler};
use crate::event::{AgentEvent, EventSink, LoopState};
use crate::graceful_stop::{self, StopReport};
use crate::intake;
use crate::invoker::ModelInvoker;
use crate::quality::{QualityCheck, QualityVerdict};
use crate::run_context::RunContext;

/// The core agent loop that orchestrates model calls and tool execution.
pub struct AgentLoop {
    invoker: ModelInvoker,
    pipeline: ToolPipeline,
    assembler: ContextAssembler,
    short_term: Arc<dyn ShortTermMemory>,
    long_term: Arc<dyn LongTermMemory>,
    /// `None` when long-term memory is switched off.
    write_policy: Option<MemoryWritePolicy>,
    ceilings: BudgetCeilings,
    request_policy: RequestPolicy,
    /// `None` when final answers are returned unreviewed.
    quality: Option<QualityCheck>,
    max_quality_retries: u32,
    /// Fixed system and developer instructions.
    instructions: String,
    max_iterations: u32,
    max_consecutive_clarifications: u32,
    retrieval_top_k: usize,
    events: EventSink,
}

/// How the decide/act cycle ended.
enum Outcome {
    Answer {
        text: String,
        termination: TerminationReason,
        is_final: bool,
    },
    Stop {
        reason: TerminationReason,
        pending: Vec<ToolCallRequest>,
        thought: Option<String>,
    },
    Refused(Refusal),
}

impl Outcome {
    fn stop(reason: TerminationReason) -> Self {
        Self::Stop {
            reason,
            pending: Vec::new(),
            thought: None,
        }
    }
}

impl AgentLoop {
    /// Create a loop from already-built collaborators, with default limits.
    pub fn new(
        invoker: ModelInvoker,
        pipeline: ToolPipeline,
        short_term: Arc<dyn ShortTermMemory>,
        long_term: Arc<dyn LongTermMemory>,
    ) -> Self {
        let config = AppConfig::default();
        let instructions = prompt::system_prompt(&config, &pipeline.allowed_definitions());
        Self {
            invoker,
            pipeline,
            assembler: ContextAssembler::from_config(&config.agent),
            short_term,
            long_term,
            write_policy: Some(MemoryWritePolicy::new(&config.memory)),
            ceilings: BudgetCeilings::from_config(&config.budget),
            request_policy: RequestPolicy::new(&config.policy),
            quality: config.agent.quality_check.then(QualityCheck::new),
            max_quality_retries: config.agent.max_quality_retries,
            instructions,
            max_iterations: config.agent.max_iterations,
            max_consecutive_clarifications: config.agent.max_consecutive_clarifications,
            retrieval_top_k: config.memory.retrieval_top_k,
            events: EventSink::default(),
        }
    }

    /// Wire up a loop from configuration with in-process memory stores.
    pub fn from_config(
        config: &AppConfig,
        provider: Arc<dyn Provider>,
        registry: Arc<ToolRegistry>,
    ) -> Self {
        let pipeline = ToolPipeline::new(registry.clone(), &config.tools, &config.guardrails);
        let instructions = prompt::system_prompt(config, &pipeline.allowed_definitions());
        let (long_term, write_policy): (Arc<dyn LongTermMemory>, _) = if config.memory.long_term_enabled {
            (
                Arc::new(InMemoryLongTerm::with_max_facts(config.memory.long_term_max_facts)),
                Some(MemoryWritePolicy::new(&config.memory)),
            )
        } else {
            (Arc::new(NoopLongTerm), None)
        };

        Self {
            invoker: ModelInvoker::from_config(config, provider, registry),
            pipeline,
            assembler: ContextAssembler::from_config(&config.agent),
            short_term: Arc::new(InMemoryShortTerm::new(config.memory.short_term_max_turns)),
            long_term,
            write_policy,
            ceilings: BudgetCeilings::from_config(&config.budget),
            request_policy: RequestPolicy::new(&config.policy),
            quality: config.agent.quality_check.then(QualityCheck::new),
            max_quality_retries: config.agent.max_quality_retries,
            instructions,
            max_iterations: config.agent.max_iterations,
            max_consecutive_clarifications: config.agent.max_consecutive_clarifications,
            retrieval_top_k: config.memory.retrieval_top_k,
            events: EventSink::default(),
        }
    }

    pub fn with_short_term(mut self, store: Arc<dyn ShortTermMemory>) -> Self {
        self.short_term = store;
        self
    }

    /// Attach a long-term store; `None` for the policy disables writes.
    pub fn with_long_term(
        mut self,
        store: Arc<dyn LongTermMemory>,
        policy: Option<MemoryWritePolicy>,
    ) -> Self {
        self.long_term = store;
        self.write_policy = policy;
        self
    }

    pub fn with_ceilings(mut self, ceilings: BudgetCeilings) -> Self {
        self.ceilings = ceilings;
        self
    }

    pub fn with_request_policy(mut self, policy: RequestPolicy) -> Self {
        self.request_policy = policy;
        self
    }

    /// Review final answers with `check`, sending one back at most
    /// `max_retries` times per run. `None` turns review off.
    pub fn with_quality_check(mut self, check: Option<QualityCheck>, max_retries: u32) -> Self {
        self.quality = check;
        self.max_quality_retries = max_retries;
        self
    }

    pub fn with_assembler(mut self, assembler: ContextAssembler) -> Self {
        self.assembler = assembler;
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    /// Set the maximum number of decide iterations per run.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_max_consecutive_clarifications(mut self, max: u32) -> Self {
        self.max_consecutive_clarifications = max;
        self
    }

    /// Send run events to an observer channel.
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.invoker = self.invoker.with_events(events.clone());
        self.events = events;
        self
    }

    pub fn short_term(&self) -> &Arc<dyn ShortTermMemory> {
        &self.short_term
    }

    pub fn long_term(&self) -> &Arc<dyn LongTermMemory> {
        &self.long_term
    }

    pub fn ceilings(&self) -> &BudgetCeilings {
        &self.ceilings
    }

    /// Process one user message to a terminal result.
    ///
    /// Never fails: model failures, budget exhaustion and cancellation all
    /// end in a graceful stop that explains what happened. A request the
    /// content policy refuses ends before any model call.
    pub async fn run(&self, request: RunRequest, cancel: CancellationToken) -> RunResult {
        let mut run = RunContext::new(request.session_id.clone(), self.ceilings.clone());
        let session = request.session_id.clone();
        info!(run_id = %run.run_id, session_id = %session, "Run started");
        self.enter(LoopState::Start, 0);

        let mut transcript = Transcript::load(&*self.short_term, &session).await;
        let clarifications = transcript.consecutive_clarifications();
        let tools = self.pipeline.allowed_definitions();
        let tool_ctx = ToolContext {
            session_id: session.clone(),
            scratch_dir: self.pipeline.scratch_dir().to_path_buf(),
        };

        let mut executed: Vec<ToolCallRequest> = Vec::new();
        let mut results: Vec<ToolResult> = Vec::new();
        let mut steps: Vec<RunStep> = Vec::new();
        let mut iteration = 0_u32;
        let mut quality_retries = 0_u32;
        let mut revision: Option<String> = None;

        let outcome = 'run: {
            let message = match intake::screen(&self.request_policy, &request.message) {
                Ok(message) => message,
                Err(refusal) => break 'run Outcome::Refused(refusal),
            };
            transcript
                .record(&*self.short_term, &session, Role::User, message.clone(), TurnKind::Text)
                .await;
            let notes = self.retrieve_notes(&session, &message).await;

            loop {
                if cancel.is_cancelled() {
                    break Outcome::stop(TerminationReason::Cancelled);
                }
                if let Some(kind) = run.governor.check(Checkpoint::IterationStart) {
                    break Outcome::stop(TerminationReason::BudgetExceeded { kind });
                }
                if iteration >= self.max_iterations {
                    warn!(run_id = %run.run_id, iteration, "Iteration limit reached");
                    break Outcome::stop(TerminationReason::IterationLimit);
                }
                iteration += 1;
                self.enter(LoopState::Deciding, iteration);

                let (history, observations) = transcript.split();
                let (signal, hint) = if observations.is_empty() {
                    (TaskSignal::Draft, None)
                } else {
                    (TaskSignal::Synthesize, Some(SYNTHESIZE_HINT))
                };
                let revision_hint = revision.take();
                let hint = revision_hint.as_deref().or(hint);
                let ctx = self.assembler.build(&AssemblyInput {
                    run: &run,
                    instructions: &self.instructions,
                    hint,
                    tools: &tools,
                    notes: &notes,
                    history,
                    observations,
                });
                debug!(
                    run_id = %run.run_id,
                    iteration,
                    messages = ctx.messages.len(),
                    tokens = ctx.metadata.total_tokens,
                    over_budget = ctx.metadata.over_budget,
                    "Context assembled"
                );

                let invocation = match self
                    .invoker
                    .decide(&ctx, signal, transcript.next_index, &mut run.governor, &cancel)
                    .await
                {
                    Ok(invocation) => invocation,
                    Err(e) => break Outcome::stop(model_failure(e, &run.governor)),
                };

                match invocation.decision {
                    Decision::FinalAnswer { text } => {
                        if let Some(reason) = self.review(&text, quality_retries) {
                            quality_retries += 1;
                            info!(
                                run_id = %run.run_id,
                                attempt = quality_retries,
                                reason = %reason,
                                "Final answer sent back for revision"
                            );
                            revision = Some(prompt::quality_feedback(&reason, &text));
                            continue;
                        }
                        transcript
                            .record(&*self.short_term, &session, Role::Assistant, text.clone(), TurnKind::Text)
                            .await;
                        break Outcome::Answer {
                            text,
                            termination: TerminationReason::FinalAnswer,
                            is_final: true,
                        };
                    }

                    Decision::ClarifyingQuestion { text } => {
                        if clarifications >= self.max_consecutive_clarifications {
                            info!(
                                run_id = %run.run_id,
                                clarifications,
                                "Clarification ceiling reached, forcing an answer"
                            );
                            match self.invoker.force_answer(&ctx, &mut run.governor, &cancel).await {
                                Ok(answer) => {
                                    transcript
                                        .record(&*self.short_term, &session, Role::Assistant, answer.clone(), TurnKind::Text)
                                        .await;
                                    break Outcome::Answer {
                                        text: answer,
                                        termination: TerminationReason::ForcedAnswer,
                                        is_final: true,
                                    };
                                }
                                Err(e) => break Outcome::stop(model_failure(e, &run.governor)),
                            }
                        }
                        self.enter(LoopState::AskingClarification, iteration);
                        transcript
                            .record(&*self.short_term, &session, Role::Assistant, text.clone(), TurnKind::Clarification)
                            .await;
                        break Outcome::Answer {
                            text,
                            termination: TerminationReason::ClarifyingQuestion,
                            is_final: false,
                        };
                    }

                    Decision::ToolCalls { thought, calls } => {
                        if let Some(kind) = run.governor.check(Checkpoint::BeforeTools) {
                            break Outcome::Stop {
                                reason: TerminationReason::BudgetExceeded { kind },
                                pending: calls,
                                thought: Some(thought),
                            };
                        }
                        transcript
                            .record(
                                &*self.short_term,
                                &session,
                                Role::Assistant,
                                thought.clone(),
                                TurnKind::ToolCalls {
                                    calls: calls.clone(),
                                },
                            )
                            .await;
                        self.enter(LoopState::ExecutingTools, iteration);

                        let batch_start = results.len();
                        let mut halted = None;
                        for (i, call) in calls.iter().enumerate() {
                            let halt = if cancel.is_cancelled() {
                                Some(TerminationReason::Cancelled)
                            } else {
                                run.governor
                                    .check(Checkpoint::BeforeTools)
                                    .map(|kind| TerminationReason::BudgetExceeded { kind })
                            };
                            if let Some(reason) = halt {
                                halted = Some((reason, calls[i..].to_vec()));
                                break;
                            }

                            self.events.emit(AgentEvent::ToolCall {
                                id: call.id.clone(),
                                name: call.name.clone(),
                                arguments: call.arguments_value(),
                            });
                            let result = self
                                .pipeline
                                .execute(call, &mut run.governor, &tool_ctx, &cancel)
                                .await;
                            self.events.emit(AgentEvent::ToolResult {
                                id: result.call_id.clone(),
                                name: result.tool_name.clone(),
                                success: result.success,
                                output: result.output.clone(),
                                duration_ms: result.duration_ms,
                            });
                            transcript
                                .record(
                                    &*self.short_term,
                                    &session,
                                    Role::Tool,
                                    result.output.clone(),
                                    TurnKind::ToolResult {
                                        result: result.clone(),
                                    },
                                )
                                .await;
                            self.remember(&session, &result).await;

                            let cancelled = result.error_kind() == Some(ToolErrorKind::Cancelled);
                            executed.push(call.clone());
                            results.push(result);
                            if cancelled {
                                halted = Some((TerminationReason::Cancelled, calls[i + 1..].to_vec()));
                                break;
                            }
                        }

                        if results.len() > batch_start {
                            steps.push(RunStep {
                                thought: (!thought.trim().is_empty()).then(|| thought.clone()),
                                tool_calls: executed[batch_start..].to_vec(),
                                tool_results: results[batch_start..].to_vec(),
                            });
                        }

                        if let Some((reason, pending)) = halted {
                            break Outcome::Stop {
                                reason,
                                pending,
                                thought: Some(thought),
                            };
                        }
                    }
                }
            }
        };

        let (message, termination, is_final, next_steps) = match outcome {
            Outcome::Answer {
                text,
                termination,
                is_final,
            } => {
                if is_final {
                    self.enter(LoopState::FinalAnswer, iteration);
                }
                (text, termination, is_final, Vec::new())
            }
            Outcome::Refused(refusal) => {
                info!(run_id = %run.run_id, reason = %refusal.reason, "Request refused by content policy");
                let reason = TerminationReason::Refused {
                    reason: refusal.reason.clone(),
                };
                (intake::refusal_message(&refusal), reason, true, Vec::new())
            }
            Outcome::Stop {
                reason,
                pending,
                thought,
            } => {
                self.enter(LoopState::GracefulStop, iteration);
                let stop = graceful_stop::compose(
                    &reason,
                    &StopReport {
                        executed: &results,
                        pending: &pending,
                        thought: thought.as_deref(),
                    },
                );
                warn!(run_id = %run.run_id, reason = ?reason, "Run stopped early");
                transcript
                    .record(&*self.short_term, &session, Role::Assistant, stop.message.clone(), TurnKind::Text)
                    .await;
                (stop.message, reason, false, stop.next_steps)
            }
        };

        run.termination = Some(termination.clone());
        let usage = run.governor.usage();
        let duration_ms = u64::try_from(run.governor.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            run_id = %run.run_id,
            session_id = %session,
            termination = ?termination,
            iterations = iteration,
            tool_calls = usage.tool_calls,
            tokens = usage.total_tokens,
            cost = usage.cost,
            duration_ms,
            "Run finished"
        );
        self.events.emit(AgentEvent::Done {
            run_id: run.run_id.clone(),
            is_final,
            termination: termination.clone(),
        });

        RunResult {
            run_id: run.run_id,
            session_id: session,
            message,
            is_final,
            termination,
            tool_calls: executed,
            tool_results: results,
            steps,
            usage,
            duration_ms,
            next_steps,
        }
    }

    fn enter(&self, state: LoopState, iteration: u32) {
        debug!(?state, iteration, "Loop state");
        self.events.emit(AgentEvent::State { state, iteration });
    }

    /// Why a final answer should go back to the model, if it should.
    fn review(&self, answer: &str, retries_used: u32) -> Option<String> {
        let check = self.quality.as_ref()?;
        match check.check(answer) {
            QualityVerdict::Pass => None,
            QualityVerdict::Note(note) => {
                debug!(note = %note, "Final answer accepted with a note");
                None
            }
            QualityVerdict::Revise(reason) if retries_used < self.max_quality_retries => Some(reason),
            QualityVerdict::Revise(reason) => {
                warn!(reason = %reason, "Quality retries used up, returning the answer as is");
                None
            }
        }
    }

    async fn retrieve_notes(&self, session: &SessionId, query: &str) -> Vec<RetrievedNote> {
        if self.retrieval_top_k == 0 {
            return Vec::new();
        }
        match self.long_term.retrieve(session, query, self.retrieval_top_k).await {
            Ok(notes) => {
                if !notes.is_empty() {
                    debug!(count = notes.len(), store = self.long_term.name(), "Retrieved notes for context");
                }
                notes
            }
            Err(e) => {
                warn!(store = self.long_term.name(), error = %e, "Long-term retrieval failed");
                Vec::new()
            }
        }
    }

    async fn remember(&self, session: &SessionId, result: &ToolResult) {
        let Some(policy) = &self.write_policy else {
            return;
        };
        if let Err(e) = policy.apply(&*self.long_term, session, result).await {
            warn!(tool = %result.tool_name, error = %e, "Memory write failed");
        }
    }
}

/// Map an invoker failure to the reason the run stops.
fn model_failure(error: ModelError, governor: &BudgetGovernor) -> TerminationReason {
    match error {
        ModelError::Cancelled => TerminationReason::Cancelled,
        ModelError::BudgetExhausted => TerminationReason::BudgetExceeded {
            kind: governor.exceeded_kind().unwrap_or(BudgetKind::Time),
        },
        ModelError::ModelOutputInvalid { .. } => TerminationReason::ModelOutputInvalid {
            detail: error.to_string(),
        },
        ModelError::ModelUnavailable { .. } => TerminationReason::ModelUnavailable {
            detail: error.to_string(),
        },
    }
}

/// The session's history as this run sees it.
///
/// Starts from the retained short-term turns and grows with every turn the
/// run records. A failed store write is logged and the turn is kept locally,
/// so a flaky store never changes what the model is shown within a run.
struct Transcript {
    turns: Vec<Turn>,
    prior: usize,
    next_index: u64,
}

impl Transcript {
    async fn load(store: &dyn ShortTermMemory, session: &SessionId) -> Self {
        let turns = store.recent(session).await.unwrap_or_else(|e| {
            warn!(session_id = %session, error = %e, "Short-term history unavailable");
            Vec::new()
        });
        let local_next = turns.last().map_or(0, |t| t.index + 1);
        let next_index = store
            .next_index(session)
            .await
            .unwrap_or(local_next)
            .max(local_next);
        Self {
            prior: turns.len(),
            turns,
            next_index,
        }
    }

    async fn record(
        &mut self,
        store: &dyn ShortTermMemory,
        session: &SessionId,
        role: Role,
        content: String,
        kind: TurnKind,
    ) {
        let turn = match store.append(session, role, content.clone(), kind.clone()).await {
            Ok(turn) => turn,
            Err(e) => {
                warn!(session_id = %session, error = %e, "Short-term append failed");
                Turn {
                    index: self.next_index,
                    role,
                    content,
                    kind,
                }
            }
        };
        self.next_index = turn.index + 1;
        self.turns.push(turn);
    }

    /// Assistant clarifications in a row before this run, newest first,
    /// stopping at the last assistant turn that was not a clarification.
    fn consecutive_clarifications(&self) -> u32 {
        let count = self.turns[..self.prior]
            .iter()
            .rev()
            .filter(|t| t.role == Role::Assistant)
            .take_while(|t| t.is_clarification())
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    /// History and the trailing observations that arrived since the last
    /// decision.
    fn split(&self) -> (&[Turn], &[Turn]) {
        let cut = self
            .turns
            .iter()
            .rposition(|t| !t.is_observation())
            .map_or(0, |p| p + 1);
        self.turns.split_at(cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use async_trait::async_trait;
    use runwarden_core::error::{ProviderError, ToolError};
    use runwarden_core::{Tool, ToolOutput};
    use runwarden_providers::{IntentRouter, RetryPolicy};
    use serde_json::{Value, json};
    use std::time::Duration;

    struct SleepTool;

    #[async_trait]
    impl Tool for SleepTool {
        fn name(&self) -> &str {
            "sleep"
        }
        fn description(&self) -> &str {
            "Sleep for a number of seconds"
        }
        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {"seconds": {"type": "integer", "minimum": 0}},
                "required": ["seconds"]
            })
        }
        async fn execute(&self, _ctx: &ToolContext, args: Value) -> Result<ToolOutput, ToolError> {
            let secs = args["seconds"].as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_secs(secs)).await;
            Ok(ToolOutput::text(format!("slept {secs}s")))
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        let (mut registry, _resources) = runwarden_tools::default_registry().unwrap();
        registry.register(Arc::new(SleepTool)).unwrap();
        Arc::new(registry)
    }

    fn agent(provider: Arc<SequentialMockProvider>) -> AgentLoop {
        agent_with(provider, AppConfig::default())
    }

    fn agent_with(provider: Arc<SequentialMockProvider>, config: AppConfig) -> AgentLoop {
        let registry = registry();
        let pipeline = ToolPipeline::new(registry.clone(), &config.tools, &config.guardrails);
        let invoker = ModelInvoker::new(provider, Arc::new(IntentRouter::new("mock-model")), registry)
            .with_retry(RetryPolicy {
                max_attempts: 1,
                fallback_models: vec![],
                ..RetryPolicy::default()
            });
        AgentLoop::new(
            invoker,
            pipeline,
            Arc::new(InMemoryShortTerm::new(config.memory.short_term_max_turns)),
            Arc::new(InMemoryLongTerm::new()),
        )
        .with_ceilings(BudgetCeilings::from_config(&config.budget))
    }

    fn request(message: &str) -> RunRequest {
        RunRequest::new(message, SessionId::from("test-session"))
    }

    #[tokio::test(start_paused = true)]
    async fn direct_answer() {
        let provider = Arc::new(SequentialMockProvider::single_text("Hello there."));
        let result = agent(provider.clone())
            .run(request("Hi"), CancellationToken::new())
            .await;

        assert!(result.is_final);
        assert_eq!(result.termination, TerminationReason::FinalAnswer);
        assert_eq!(result.message, "Hello there.");
        assert!(result.tool_calls.is_empty());
        assert_eq!(result.usage.model_calls, 1);
        assert!(result.next_steps.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn calculator_then_answer() {
        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("c1", "calculator", json!({"expression": "15 * 27"}))],
            "I'll compute it.",
            "15 * 27 = 405",
        ));
        let agent = agent(provider.clone());
        let result = agent.run(request("what is 15 * 27?"), CancellationToken::new()).await;

        assert!(result.is_final);
        assert_eq!(result.tool_results.len(), 1);
        assert_eq!(result.tool_results[0].payload, json!(405));
        assert!(result.message.contains("405"));
        assert_eq!(result.usage.tool_calls, 1);

        // Second decision sees the observation last, answering its call
        let second = &provider.requests()[1];
        let last = second.messages.last().unwrap();
        assert_eq!(last.role, Role::Tool);
        assert_eq!(last.tool_call_id.as_deref(), Some("c1"));
        assert!(second.messages[0].content.contains(SYNTHESIZE_HINT));

        // user, tool calls, observation, answer
        let turns = agent
            .short_term()
            .recent(&SessionId::from("test-session"))
            .await
            .unwrap();
        assert_eq!(turns.len(), 4);
        assert!(turns.windows(2).all(|w| w[0].index < w[1].index));
        let TurnKind::ToolCalls { calls } = &turns[1].kind else {
            panic!("expected tool calls turn");
        };
        assert_eq!(calls[0].turn_index, turns[1].index);
    }

    #[tokio::test(start_paused = true)]
    async fn tool_batches_are_recorded_as_steps() {
        let provider = Arc::new(SequentialMockProvider::replies(vec![
            make_tool_call_response(
                vec![
                    make_tool_call("c1", "calculator", json!({"expression": "2 + 2"})),
                    make_tool_call("c2", "calculator", json!({"expression": "3 * 3"})),
                ],
                "Both sums first.",
            ),
            make_tool_call_response(
                vec![make_tool_call("c3", "calculator", json!({"expression": "4 + 9"}))],
                "",
            ),
            make_text_response("2 + 2 = 4, 3 * 3 = 9, together 13"),
        ]));
        let result = agent(provider).run(request("add things up"), CancellationToken::new()).await;

        assert_eq!(result.termination, TerminationReason::FinalAnswer);
        assert_eq!(result.steps.len(), 2);
        assert_eq!(result.steps[0].thought.as_deref(), Some("Both sums first."));
        let ids: Vec<&str> = result.steps[0]
            .tool_results
            .iter()
            .map(|r| r.call_id.as_str())
            .collect();
        assert_eq!(ids, vec!["c1", "c2"]);
        assert!(result.steps[1].thought.is_none());
        assert_eq!(result.steps[1].tool_calls.len(), 1);
        assert_eq!(result.tool_results.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn weak_answer_is_sent_back_for_revision() {
        let provider = Arc::new(SequentialMockProvider::replies(vec![
            make_text_response("Sorry, I can't help with that."),
            make_text_response("15 * 27 = 405"),
        ]));
        let agent = agent(provider.clone());
        let result = agent.run(request("what is 15 * 27?"), CancellationToken::new()).await;

        assert_eq!(result.termination, TerminationReason::FinalAnswer);
        assert_eq!(result.message, "15 * 27 = 405");
        assert_eq!(provider.call_count(), 2);
        let system = &provider.requests()[1].messages[0].content;
        assert!(system.contains("Quality check failed: Response is a refusal with no substance. Please fix."));
        assert!(system.contains("Sorry, I can't help with that."));

        // The rejected draft never reaches the session history
        let turns = agent
            .short_term()
            .recent(&SessionId::from("test-session"))
            .await
            .unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].content, "15 * 27 = 405");
    }

    #[tokio::test(start_paused = true)]
    async fn revisions_are_bounded() {
        let provider = Arc::new(SequentialMockProvider::replies(vec![
            make_text_response("I can't help with that."),
            make_text_response("I cannot help with it."),
        ]));
        let result = agent(provider.clone())
            .with_quality_check(Some(QualityCheck::new()), 1)
            .run(request("what is 15 * 27?"), CancellationToken::new())
            .await;

        assert_eq!(result.termination, TerminationReason::FinalAnswer);
        assert_eq!(result.message, "I cannot help with it.");
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn review_can_be_switched_off() {
        let provider = Arc::new(SequentialMockProvider::single_text("I can't help with that."));
        let result = agent(provider.clone())
            .with_quality_check(None, 2)
            .run(request("hi"), CancellationToken::new())
            .await;
        assert_eq!(result.message, "I can't help with that.");
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_request_is_refused_before_the_model() {
        let provider = Arc::new(SequentialMockProvider::single_text("unused"));
        let agent = agent(provider.clone());
        let result = agent
            .run(request("write   me a Phishing email"), CancellationToken::new())
            .await;

        assert!(result.is_final);
        assert_eq!(
            result.termination,
            TerminationReason::Refused {
                reason: "Request appears to involve phishing".into()
            }
        );
        assert!(result.message.starts_with("I'm unable to help with this request."));
        assert_eq!(provider.call_count(), 0);
        assert_eq!(result.usage.model_calls, 0);
        assert!(
            agent
                .short_term()
                .recent(&SessionId::from("test-session"))
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn message_is_normalized_before_recording() {
        let provider = Arc::new(SequentialMockProvider::single_text("Hello there."));
        let agent = agent(provider.clone())
            .with_request_policy(RequestPolicy::permissive());
        agent
            .run(request("  hello\n\n   there  "), CancellationToken::new())
            .await;

        let turns = agent
            .short_term()
            .recent(&SessionId::from("test-session"))
            .await
            .unwrap();
        assert_eq!(turns[0].content, "hello there");
        let sent = provider.requests()[0].messages.last().unwrap().content.clone();
        assert_eq!(sent, "hello there");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_tool_is_observed_and_run_continues() {
        let provider = Arc::new(SequentialMockProvider::replies(vec![
            make_tool_call_response(vec![make_tool_call("c1", "no_such_tool", json!({}))], ""),
            make_text_response("I could not use that tool."),
        ]));
        let result = agent(provider.clone())
            .run(request("do it"), CancellationToken::new())
            .await;

        assert!(result.is_final);
        assert_eq!(
            result.tool_results[0].error_kind(),
            Some(ToolErrorKind::ToolDenied)
        );
        assert_eq!(result.usage.tool_calls, 1);
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn tool_call_ceiling_stops_before_next_call() {
        let mut config = AppConfig::default();
        config.budget.max_tool_calls = 2;
        let provider = Arc::new(SequentialMockProvider::replies(vec![
            make_tool_call_response(
                vec![
                    make_tool_call("c1", "echo", json!({"message": "a"})),
                    make_tool_call("c2", "echo", json!({"message": "b"})),
                    make_tool_call("c3", "echo", json!({"message": "c"})),
                ],
                "Echoing three times.",
            ),
        ]));
        let result = agent_with(provider, config)
            .run(request("echo"), CancellationToken::new())
            .await;

        assert!(!result.is_final);
        assert_eq!(
            result.termination,
            TerminationReason::BudgetExceeded {
                kind: BudgetKind::ToolCalls
            }
        );
        assert_eq!(result.tool_results.len(), 2);
        assert_eq!(result.usage.tool_calls, 2);
        assert!(result.message.contains("Not executed:\n- echo"));
        assert!(!result.next_steps.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tool_times_out_and_loop_continues() {
        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("c1", "sleep", json!({"seconds": 30}))],
            "",
            "The tool was too slow.",
        ));
        let result = agent(provider)
            .run(request("sleep"), CancellationToken::new())
            .await;

        assert!(result.is_final);
        assert_eq!(
            result.tool_results[0].error_kind(),
            Some(ToolErrorKind::ToolTimeout)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn time_budget_turns_slow_tool_into_graceful_stop() {
        let mut config = AppConfig::default();
        config.budget.max_time_seconds = 1.0;
        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("c1", "sleep", json!({"seconds": 2}))],
            "",
            "slept 2s",
        ));
        let result = agent_with(provider.clone(), config)
            .run(request("sleep"), CancellationToken::new())
            .await;

        assert!(!result.is_final);
        assert_eq!(
            result.termination,
            TerminationReason::BudgetExceeded {
                kind: BudgetKind::Time
            }
        );
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn model_output_invalid_is_graceful() {
        let provider = Arc::new(SequentialMockProvider::replies(vec![
            make_text_response(""),
            make_text_response(""),
            make_text_response(""),
        ]));
        let result = agent(provider)
            .run(request("hello"), CancellationToken::new())
            .await;

        assert!(!result.is_final);
        assert!(matches!(
            result.termination,
            TerminationReason::ModelOutputInvalid { .. }
        ));
        assert!(result.message.contains("could not use"));
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_model_is_graceful() {
        let provider = Arc::new(SequentialMockProvider::new(vec![Step::Fail(
            ProviderError::AuthenticationFailed("bad key".into()),
        )]));
        let result = agent(provider)
            .run(request("hello"), CancellationToken::new())
            .await;

        assert!(matches!(
            result.termination,
            TerminationReason::ModelUnavailable { .. }
        ));
        assert!(result.next_steps.iter().any(|s| s.contains("API key")));
    }

    #[tokio::test(start_paused = true)]
    async fn clarification_ceiling_forces_answer() {
        let provider = Arc::new(SequentialMockProvider::replies(vec![
            make_text_response("CLARIFY: Which city?"),
            make_text_response("CLARIFY: Which country?"),
            make_text_response("CLARIFY: Which continent?"),
            make_text_response("Assuming Paris: sunny."),
        ]));
        let agent = agent(provider.clone());

        let first = agent.run(request("Weather?"), CancellationToken::new()).await;
        assert_eq!(first.termination, TerminationReason::ClarifyingQuestion);
        assert!(!first.is_final);
        assert_eq!(first.message, "Which city?");

        let second = agent.run(request("Not sure"), CancellationToken::new()).await;
        assert_eq!(second.termination, TerminationReason::ClarifyingQuestion);

        let third = agent.run(request("Still not sure"), CancellationToken::new()).await;
        assert_eq!(third.termination, TerminationReason::ForcedAnswer);
        assert!(third.is_final);
        assert_eq!(third.message, "Assuming Paris: sunny.");
        assert_eq!(provider.call_count(), 4);
        assert!(provider.requests()[3].tools.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_start() {
        let provider = Arc::new(SequentialMockProvider::single_text("never"));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = agent(provider.clone()).run(request("hi"), cancel).await;

        assert_eq!(result.termination, TerminationReason::Cancelled);
        assert!(!result.message.is_empty());
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_tool_stops_run() {
        let provider = Arc::new(SequentialMockProvider::replies(vec![make_tool_call_response(
            vec![
                make_tool_call("c1", "sleep", json!({"seconds": 10})),
                make_tool_call("c2", "echo", json!({"message": "after"})),
            ],
            "",
        )]));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });
        let result = agent(provider).run(request("sleep"), cancel).await;

        assert_eq!(result.termination, TerminationReason::Cancelled);
        assert_eq!(result.tool_results.len(), 1);
        assert_eq!(
            result.tool_results[0].error_kind(),
            Some(ToolErrorKind::Cancelled)
        );
        assert!(result.message.contains("Not executed:\n- echo"));
    }

    #[tokio::test(start_paused = true)]
    async fn iteration_cap_ends_run() {
        let provider = Arc::new(SequentialMockProvider::replies(vec![
            make_tool_call_response(vec![make_tool_call("c1", "echo", json!({"message": "1"}))], ""),
            make_tool_call_response(vec![make_tool_call("c2", "echo", json!({"message": "2"}))], ""),
        ]));
        let result = agent(provider)
            .with_max_iterations(2)
            .run(request("loop"), CancellationToken::new())
            .await;

        assert_eq!(result.termination, TerminationReason::IterationLimit);
        assert_eq!(result.tool_calls.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn events_trace_the_run() {
        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("c1", "echo", json!({"message": "hi"}))],
            "",
            "done",
        ));
        let (events, mut rx) = EventSink::channel(64);
        agent(provider)
            .with_events(events)
            .run(request("echo hi"), CancellationToken::new())
            .await;

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.event_type());
        }
        assert_eq!(kinds.first(), Some(&"state"));
        assert!(kinds.contains(&"tool_call"));
        assert!(kinds.contains(&"tool_result"));
        assert_eq!(kinds.last(), Some(&"done"));
    }

    #[tokio::test(start_paused = true)]
    async fn long_output_is_remembered_and_retrieved() {
        let long = "The deployment region for the analytics service is eu-west-1 in Ireland.";
        let provider = Arc::new(SequentialMockProvider::replies(vec![
            make_tool_call_response(vec![make_tool_call("c1", "echo", json!({"message": long}))], ""),
            make_text_response("Noted."),
            make_text_response("eu-west-1"),
        ]));
        let agent = agent(provider.clone());
        agent.run(request("remember the region"), CancellationToken::new()).await;
        agent
            .run(request("which deployment region for analytics?"), CancellationToken::new())
            .await;

        let third = &provider.requests()[2];
        assert!(
            third
                .messages
                .iter()
                .any(|m| m.role == Role::System && m.content.contains("[Retrieved notes]"))
        );
    }

    #[tokio::test]
    async fn model_failures_map_to_reasons() {
        let governor = BudgetGovernor::new(BudgetCeilings::default());
        assert_eq!(
            model_failure(ModelError::Cancelled, &governor),
            TerminationReason::Cancelled
        );
        assert_eq!(
            model_failure(ModelError::BudgetExhausted, &governor),
            TerminationReason::BudgetExceeded {
                kind: BudgetKind::Time
            }
        );
    }
}
