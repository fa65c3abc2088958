//! Model invocation: one assembled context in, one [`Decision`] out.
//!
//! The invoker owns everything between the loop and the provider trait:
//! routing a task signal to a model, bounded retries with backoff, falling
//! back through the configured model chain, repairing malformed replies, and
//! charging each completed round trip to the run's budget governor.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use runwarden_config::AppConfig;
use runwarden_core::error::{ModelError, ProviderError};
use runwarden_core::message::Message;
use runwarden_core::provider::{Provider, ProviderRequest, ProviderResponse};
use runwarden_core::{Decision, ToolCallRequest, ToolRegistry};
use runwarden_providers::{IntentRouter, ModelRouter, RetryPolicy, TaskSignal};
use runwarden_telemetry::{BudgetGovernor, Checkpoint, PricingTable};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::context::prompt::{FORCE_ANSWER_INSTRUCTION, repair_instruction};
use crate::context::{AssembledContext, CLARIFY_MARKER, token};
use crate::event::{AgentEvent, EventSink};

/// A parsed decision and where it came from.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub decision: Decision,
    /// Model that produced the accepted reply.
    pub model: String,
    /// Parse attempts used, 1 when no repair was needed.
    pub attempts: u32,
}

pub struct ModelInvoker {
    provider: Arc<dyn Provider>,
    router: Arc<dyn ModelRouter>,
    retry: RetryPolicy,
    registry: Arc<ToolRegistry>,
    pricing: PricingTable,
    temperature: f32,
    max_response_tokens: Option<u32>,
    max_repair_attempts: u32,
    request_timeout: Duration,
    events: EventSink,
}

impl ModelInvoker {
    pub fn new(
        provider: Arc<dyn Provider>,
        router: Arc<dyn ModelRouter>,
        registry: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            provider,
            router,
            retry: RetryPolicy::default(),
            registry,
            pricing: PricingTable::with_defaults(),
            temperature: 0.2,
            max_response_tokens: None,
            max_repair_attempts: 2,
            request_timeout: Duration::from_secs(60),
            events: EventSink::default(),
        }
    }

    pub fn from_config(
        config: &AppConfig,
        provider: Arc<dyn Provider>,
        registry: Arc<ToolRegistry>,
    ) -> Self {
        Self::new(
            provider,
            Arc::new(IntentRouter::from_config(config)),
            registry,
        )
        .with_retry(RetryPolicy::from_config(
            &config.retry,
            &config.fallback_models,
        ))
        .with_pricing(PricingTable::with_overrides(&config.pricing))
        .with_temperature(config.temperature)
        .with_max_response_tokens(config.max_response_tokens)
        .with_max_repair_attempts(config.retry.max_repair_attempts)
        .with_request_timeout(Duration::from_secs(
            config.retry.request_timeout_seconds.max(1),
        ))
    }

    pub fn with_router(mut self, router: Arc<dyn ModelRouter>) -> Self {
        self.router = router;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry.normalized();
        self
    }

    pub fn with_pricing(mut self, pricing: PricingTable) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_response_tokens(mut self, max: u32) -> Self {
        self.max_response_tokens = Some(max);
        self
    }

    pub fn with_max_repair_attempts(mut self, attempts: u32) -> Self {
        self.max_repair_attempts = attempts;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Ask the routed model for the next decision.
    ///
    /// Tool calls are stamped with `turn_index`, the index the loop will give
    /// the assistant turn that records them. A reply that cannot be turned
    /// into a decision is answered with a stricter instruction at temperature
    /// zero, up to `max_repair_attempts` times.
    pub async fn decide(
        &self,
        ctx: &AssembledContext,
        signal: TaskSignal,
        turn_index: u64,
        governor: &mut BudgetGovernor,
        cancel: &CancellationToken,
    ) -> Result<Invocation, ModelError> {
        let model = self.router.select(signal);
        let max_attempts = self.max_repair_attempts.saturating_add(1);
        let mut messages = ctx.messages.clone();
        let mut temperature = self.temperature;
        let mut last_reason = String::new();

        for attempt in 1..=max_attempts {
            if attempt > 1 && governor.check(Checkpoint::IterationStart).is_some() {
                return Err(ModelError::BudgetExhausted);
            }

            let request = ProviderRequest {
                model: model.clone(),
                messages: messages.clone(),
                temperature,
                max_tokens: self.max_response_tokens,
                tools: ctx.tools.clone(),
            };
            let (response, served_by) = self.complete_with_fallback(request, governor, cancel).await?;

            match parse_reply(&response.message, &self.registry, turn_index) {
                Ok(decision) => {
                    debug!(model = %served_by, attempt, decision = decision.label(), "Model decided");
                    return Ok(Invocation {
                        decision,
                        model: served_by,
                        attempts: attempt,
                    });
                }
                Err(reason) => {
                    warn!(model = %served_by, attempt, %reason, "Malformed model output");
                    self.events.emit(AgentEvent::Retry {
                        model: served_by,
                        attempt,
                        reason: reason.clone(),
                    });
                    let echoed = response.message.content.trim();
                    if !echoed.is_empty() {
                        messages.push(Message::assistant(echoed));
                    }
                    messages.push(Message::user(repair_instruction(&reason, attempt)));
                    temperature = 0.0;
                    last_reason = reason;
                }
            }
        }

        Err(ModelError::ModelOutputInvalid {
            attempts: max_attempts,
            reason: last_reason,
        })
    }

    /// Demand a final answer without tools.
    ///
    /// Used once the clarification ceiling is reached. A leading clarify
    /// marker is stripped and any tool calls are ignored.
    pub async fn force_answer(
        &self,
        ctx: &AssembledContext,
        governor: &mut BudgetGovernor,
        cancel: &CancellationToken,
    ) -> Result<String, ModelError> {
        let mut messages = ctx.messages.clone();
        messages.push(Message::user(FORCE_ANSWER_INSTRUCTION));
        let request = ProviderRequest {
            model: self.router.select(TaskSignal::Verify),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_response_tokens,
            tools: Vec::new(),
        };
        let (response, served_by) = self.complete_with_fallback(request, governor, cancel).await?;
        debug!(model = %served_by, "Forced answer received");

        let text = response.message.content.trim();
        let text = text.strip_prefix(CLARIFY_MARKER).map_or(text, str::trim);
        if text.is_empty() {
            return Err(ModelError::ModelOutputInvalid {
                attempts: 1,
                reason: "the forced answer was empty".into(),
            });
        }
        Ok(text.to_string())
    }

    /// Send `request` to the routed model, then to each fallback in turn.
    ///
    /// Every attempt is bounded by the request timeout and by the time left
    /// in the run. Returns the response and the model that served it.
    async fn complete_with_fallback(
        &self,
        request: ProviderRequest,
        governor: &mut BudgetGovernor,
        cancel: &CancellationToken,
    ) -> Result<(ProviderResponse, String), ModelError> {
        let chain = self.retry.model_chain(&request.model);
        let mut last_error = String::new();

        for model in &chain {
            let mut attempt = 0_u32;
            loop {
                attempt += 1;
                let remaining = governor.remaining_time();
                if remaining.is_zero() {
                    return Err(ModelError::BudgetExhausted);
                }
                let budget_bound = remaining < self.request_timeout;
                let limit = self.request_timeout.min(remaining);

                let mut attempt_request = request.clone();
                attempt_request.model = model.clone();
                debug!(%model, attempt, messages = attempt_request.messages.len(), "Calling model");

                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(ModelError::Cancelled),
                    r = tokio::time::timeout(limit, self.provider.complete(attempt_request.clone())) => r,
                };

                let error = match outcome {
                    Ok(Ok(response)) => {
                        self.charge(&attempt_request, &response, governor);
                        return Ok((response, model.clone()));
                    }
                    Ok(Err(e)) => e,
                    Err(_) if budget_bound => return Err(ModelError::BudgetExhausted),
                    Err(_) => ProviderError::Timeout(format!(
                        "no response within {}s",
                        limit.as_secs()
                    )),
                };

                warn!(%model, attempt, error = %error, "Model call failed");
                last_error = error.to_string();

                let Some(delay) = self.retry.delay_after(&error, attempt) else {
                    break;
                };
                if delay >= governor.remaining_time() {
                    return Err(ModelError::BudgetExhausted);
                }
                self.events.emit(AgentEvent::Retry {
                    model: model.clone(),
                    attempt,
                    reason: last_error.clone(),
                });
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(ModelError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        Err(ModelError::ModelUnavailable {
            models_tried: chain,
            last_error,
        })
    }

    fn charge(&self, request: &ProviderRequest, response: &ProviderResponse, governor: &mut BudgetGovernor) {
        let usage = response.usage.clone().unwrap_or_else(|| {
            token::estimate_usage(&request.messages, &request.tools, &response.message)
        });
        let cost = usage
            .cost
            .unwrap_or_else(|| self.pricing.estimate(&request.model, &usage));
        governor.charge_model_call(&usage, cost);
    }
}

/// Turn a provider reply into a decision, or say why it cannot be used.
fn parse_reply(
    message: &Message,
    registry: &ToolRegistry,
    turn_index: u64,
) -> Result<Decision, String> {
    if !message.tool_calls.is_empty() {
        let mut seen = HashSet::new();
        let mut calls = Vec::with_capacity(message.tool_calls.len());
        for call in &message.tool_calls {
            let name = call.name.trim();
            if name.is_empty() {
                return Err("a tool call has no tool name".into());
            }

            let raw = call.arguments.trim();
            let value: Value = if raw.is_empty() {
                Value::Object(Map::new())
            } else {
                serde_json::from_str(raw)
                    .map_err(|e| format!("arguments for '{name}' are not valid JSON: {e}"))?
            };
            let Value::Object(arguments) = value else {
                return Err(format!("arguments for '{name}' are not a JSON object"));
            };

            // Unknown names go through; the tool pipeline denies them.
            if registry.contains(name) {
                let as_value = Value::Object(arguments.clone());
                registry
                    .validate(name, &as_value)
                    .map_err(|e| format!("arguments for '{name}' do not match its schema: {e}"))?;
            }

            let id = call.id.trim();
            let id = if id.is_empty() || seen.contains(id) {
                format!("call_{}", uuid::Uuid::new_v4().simple())
            } else {
                id.to_string()
            };
            seen.insert(id.clone());
            calls.push(ToolCallRequest::new(id, name, arguments, turn_index));
        }
        return Ok(Decision::ToolCalls {
            thought: message.content.trim().to_string(),
            calls,
        });
    }

    let text = message.content.trim();
    if text.is_empty() {
        return Err("the reply had neither text nor tool calls".into());
    }
    if let Some(question) = text.strip_prefix(CLARIFY_MARKER) {
        let question = question.trim();
        if question.is_empty() {
            return Err(format!("`{CLARIFY_MARKER}` was not followed by a question"));
        }
        return Ok(Decision::ClarifyingQuestion {
            text: question.into(),
        });
    }
    Ok(Decision::FinalAnswer { text: text.into() })
}
