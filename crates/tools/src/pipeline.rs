//! Tool execution pipeline.
//!
//! `execute` turns one [`ToolCallRequest`] into exactly one [`ToolResult`]
//! and never returns an error: every failure becomes a result with
//! `success = false`. Checks run in order and the first failure wins:
//!
//! 1. allow-list, then registry lookup (`ToolDenied`)
//! 2. schema validation (`InvalidArguments`)
//! 3. guardrails (`ToolDenied`)
//! 4. bounded execution (`ToolTimeout`, `ToolExecutionError`, `Cancelled`)
//! 5. output normalization with a truncation marker
//!
//! One tool call is charged to the governor before any check runs, so
//! denied and failed calls count against the budget too.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use runwarden_config::{GuardrailConfig, ToolsConfig};
use runwarden_core::error::ToolError;
use runwarden_core::{
    ToolCallRequest, ToolContext, ToolDefinition, ToolErrorKind, ToolOutput, ToolRegistry,
    ToolResult,
};
use runwarden_security::{Guardrails, ToolAllowlist, redact_value};
use runwarden_telemetry::BudgetGovernor;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Appended to rendered output that was cut at `max_output_chars`.
pub const TRUNCATION_MARKER: &str = "\n... [truncated]";

enum Outcome {
    Completed(ToolOutput),
    Failed(ToolError),
    Panicked(String),
    TimedOut,
    Cancelled,
}

pub struct ToolPipeline {
    registry: Arc<ToolRegistry>,
    allowlist: ToolAllowlist,
    guardrails: Guardrails,
    timeout: Duration,
    max_output_chars: usize,
}

impl ToolPipeline {
    pub fn new(
        registry: Arc<ToolRegistry>,
        tools: &ToolsConfig,
        guardrails: &GuardrailConfig,
    ) -> Self {
        Self {
            registry,
            allowlist: ToolAllowlist::from_names(tools.allowed_tools.iter().cloned()),
            guardrails: Guardrails::new(guardrails, tools.scratch_dir()),
            timeout: Duration::from_secs(tools.timeout_seconds),
            max_output_chars: tools.max_output_chars,
        }
    }

    pub fn with_allowlist(mut self, allowlist: ToolAllowlist) -> Self {
        self.allowlist = allowlist;
        self
    }

    pub fn with_guardrails(mut self, guardrails: Guardrails) -> Self {
        self.guardrails = guardrails;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn scratch_dir(&self) -> &std::path::Path {
        self.guardrails.scratch_dir()
    }

    /// Definitions of the tools this pipeline will run, ordered by name.
    pub fn allowed_definitions(&self) -> Vec<ToolDefinition> {
        self.registry
            .definitions()
            .into_iter()
            .filter(|d| self.allowlist.allows(&d.name))
            .collect()
    }

    /// Run one tool call through every check and return its result.
    pub async fn execute(
        &self,
        request: &ToolCallRequest,
        governor: &mut BudgetGovernor,
        ctx: &ToolContext,
        cancel: &CancellationToken,
    ) -> ToolResult {
        let started = Instant::now();
        governor.charge_tool_call();

        let fail = |kind: ToolErrorKind, message: String| {
            warn!(tool = %request.name, call_id = %request.id, %kind, %message, "Tool call failed");
            ToolResult::failure(
                &request.id,
                &request.name,
                kind,
                message,
                elapsed_ms(started),
            )
        };

        if !self.allowlist.allows(&request.name) {
            return fail(
                ToolErrorKind::ToolDenied,
                self.allowlist.denial_reason(&request.name),
            );
        }

        let Some(tool) = self.registry.get(&request.name) else {
            return fail(
                ToolErrorKind::ToolDenied,
                format!("Unknown tool '{}'", request.name),
            );
        };

        let arguments = request.arguments_value();
        if let Err(e) = self.registry.validate(&request.name, &arguments) {
            return fail(ToolErrorKind::InvalidArguments, e.to_string());
        }

        if let Err(violation) = self.guardrails.check(&request.arguments) {
            return fail(
                ToolErrorKind::ToolDenied,
                format!("Blocked by guardrail: {violation}"),
            );
        }

        let remaining = governor.remaining_time();
        let budget_bound = remaining < self.timeout;
        let limit = self.timeout.min(remaining);

        debug!(
            tool = %request.name,
            call_id = %request.id,
            args = %redact_value(&arguments),
            timeout_ms = limit.as_millis() as u64,
            "Executing tool"
        );

        let call_ctx = ctx.clone();
        let mut handle = tokio::spawn(async move { tool.execute(&call_ctx, arguments).await });

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                handle.abort();
                Outcome::Cancelled
            }
            joined = tokio::time::timeout(limit, &mut handle) => match joined {
                Err(_) => {
                    handle.abort();
                    Outcome::TimedOut
                }
                Ok(Err(join_error)) if join_error.is_panic() => {
                    Outcome::Panicked(panic_message(join_error.into_panic()))
                }
                Ok(Err(join_error)) => Outcome::Panicked(join_error.to_string()),
                Ok(Ok(Err(tool_error))) => Outcome::Failed(tool_error),
                Ok(Ok(Ok(output))) => Outcome::Completed(output),
            },
        };

        match outcome {
            Outcome::Completed(output) => {
                let result = self.normalize(request, output, elapsed_ms(started));
                info!(
                    tool = %request.name,
                    call_id = %request.id,
                    duration_ms = result.duration_ms,
                    truncated = result.truncated,
                    "Tool call succeeded"
                );
                result
            }
            Outcome::Failed(ToolError::InvalidArguments(reason)) => {
                fail(ToolErrorKind::InvalidArguments, reason)
            }
            Outcome::Failed(e @ ToolError::NotPermitted(_)) => {
                fail(ToolErrorKind::ToolDenied, e.to_string())
            }
            Outcome::Failed(e) => fail(ToolErrorKind::ToolExecutionError, e.to_string()),
            Outcome::Panicked(message) => fail(
                ToolErrorKind::ToolExecutionError,
                format!("Tool panicked: {message}"),
            ),
            Outcome::TimedOut if budget_bound => fail(
                ToolErrorKind::ToolTimeout,
                format!(
                    "Stopped after {:.1}s: the run's time budget ran out",
                    limit.as_secs_f64()
                ),
            ),
            Outcome::TimedOut => fail(
                ToolErrorKind::ToolTimeout,
                format!("Timed out after {}s", limit.as_secs()),
            ),
            Outcome::Cancelled => fail(
                ToolErrorKind::Cancelled,
                "Run was cancelled while the tool was executing".into(),
            ),
        }
    }

    fn normalize(&self, request: &ToolCallRequest, output: ToolOutput, duration_ms: u64) -> ToolResult {
        let rendered = output.render();
        let mut result = ToolResult::success(
            &request.id,
            &request.name,
            output.payload,
            rendered,
            duration_ms,
        );
        if result.output.chars().count() > self.max_output_chars {
            let mut cut: String = result.output.chars().take(self.max_output_chars).collect();
            cut.push_str(TRUNCATION_MARKER);
            result.output = cut;
            result.truncated = true;
        }
        result
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use runwarden_core::{SessionId, Tool};
    use runwarden_telemetry::BudgetCeilings;
    use serde_json::{Map, Value, json};

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

    struct WordsTool;

    #[async_trait]
    impl Tool for WordsTool {
        fn name(&self) -> &str {
            "words"
        }
        fn description(&self) -> &str {
            "Repeat a word"
        }
        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {
                    "word": {"type": "string"},
                    "times": {"type": "integer"}
                },
                "required": ["word", "times"]
            })
        }
        async fn execute(&self, _ctx: &ToolContext, args: Value) -> Result<ToolOutput, ToolError> {
            let word = args["word"].as_str().unwrap_or_default();
            let times = args["times"].as_u64().unwrap_or(1) as usize;
            if word == "boom" {
                panic!("word exploded");
            }
            if word == "fail" {
                return Err(ToolError::ExecutionFailed {
                    tool_name: "words".into(),
                    reason: "disk full".into(),
                });
            }
            if word == "theirs" {
                return Err(ToolError::NotPermitted("belongs to another session".into()));
            }
            Ok(ToolOutput::new(json!({"count": times})).with_text(word.repeat(times)))
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SleepTool)).unwrap();
        registry.register(Arc::new(WordsTool)).unwrap();
        Arc::new(registry)
    }

    fn pipeline() -> ToolPipeline {
        let tools = ToolsConfig {
            scratch_dir: Some("/tmp/runwarden-test".into()),
            max_output_chars: 100,
            ..ToolsConfig::default()
        };
        ToolPipeline::new(registry(), &tools, &GuardrailConfig::default())
    }

    fn governor() -> BudgetGovernor {
        BudgetGovernor::new(BudgetCeilings::default())
    }

    fn ctx() -> ToolContext {
        ToolContext {
            session_id: SessionId::from("test"),
            scratch_dir: "/tmp/runwarden-test".into(),
        }
    }

    fn call(name: &str, args: Value) -> ToolCallRequest {
        let args: Map<String, Value> = args.as_object().cloned().unwrap_or_default();
        ToolCallRequest::new("call_1", name, args, 1)
    }

    async fn run(p: &ToolPipeline, g: &mut BudgetGovernor, request: ToolCallRequest) -> ToolResult {
        p.execute(&request, g, &ctx(), &CancellationToken::new()).await
    }

    #[tokio::test(start_paused = true)]
    async fn disallowed_tool_denied_and_charged() {
        let p = pipeline().with_allowlist(ToolAllowlist::from_names(["words"]));
        let mut g = governor();
        let result = run(&p, &mut g, call("sleep", json!({"seconds": 1}))).await;
        assert!(!result.success);
        assert_eq!(result.error_kind(), Some(ToolErrorKind::ToolDenied));
        assert_eq!(g.tool_calls_used(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_tool_denied() {
        let mut g = governor();
        let result = run(&pipeline(), &mut g, call("teleport", json!({}))).await;
        assert_eq!(result.error_kind(), Some(ToolErrorKind::ToolDenied));
        assert!(result.output.contains("Unknown tool"));
        assert_eq!(g.tool_calls_used(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn schema_violation_is_invalid_arguments() {
        let mut g = governor();
        let result = run(&pipeline(), &mut g, call("words", json!({"word": "hi"}))).await;
        assert_eq!(result.error_kind(), Some(ToolErrorKind::InvalidArguments));

        let result = run(&pipeline(), &mut g, call("words", json!({"word": 3, "times": 1}))).await;
        assert_eq!(result.error_kind(), Some(ToolErrorKind::InvalidArguments));
        assert_eq!(g.tool_calls_used(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn guardrail_violation_is_denied() {
        let mut g = governor();
        let result = run(
            &pipeline(),
            &mut g,
            call("words", json!({"word": "rm -rf /", "times": 1})),
        )
        .await;
        assert_eq!(result.error_kind(), Some(ToolErrorKind::ToolDenied));
        assert!(result.output.contains("guardrail"));
    }

    #[tokio::test(start_paused = true)]
    async fn success_keeps_payload_and_text() {
        let mut g = governor();
        let result = run(&pipeline(), &mut g, call("words", json!({"word": "ab", "times": 3}))).await;
        assert!(result.success);
        assert_eq!(result.output, "ababab");
        assert_eq!(result.payload, json!({"count": 3}));
        assert!(!result.truncated);
    }

    #[tokio::test(start_paused = true)]
    async fn long_output_truncated_with_marker() {
        let mut g = governor();
        let result = run(&pipeline(), &mut g, call("words", json!({"word": "x", "times": 250}))).await;
        assert!(result.success);
        assert!(result.truncated);
        assert!(result.output.ends_with(TRUNCATION_MARKER));
        assert_eq!(result.output.chars().count(), 100 + TRUNCATION_MARKER.chars().count());
        assert_eq!(result.payload, json!({"count": 250}));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tool_times_out() {
        let mut g = governor();
        let result = run(&pipeline(), &mut g, call("sleep", json!({"seconds": 30}))).await;
        assert_eq!(result.error_kind(), Some(ToolErrorKind::ToolTimeout));
        assert!(result.output.contains("15s"));
        assert!(result.duration_ms >= 15_000 && result.duration_ms < 30_000);
    }

    #[tokio::test(start_paused = true)]
    async fn time_budget_caps_tool_timeout() {
        let mut g = BudgetGovernor::new(BudgetCeilings {
            max_time: Duration::from_secs(1),
            ..BudgetCeilings::default()
        });
        let result = run(&pipeline(), &mut g, call("sleep", json!({"seconds": 2}))).await;
        assert_eq!(result.error_kind(), Some(ToolErrorKind::ToolTimeout));
        assert!(result.output.contains("time budget"));
        assert!(g.is_exhausted(runwarden_core::BudgetKind::Time));
    }

    #[tokio::test(start_paused = true)]
    async fn tool_error_and_panic_are_captured() {
        let mut g = governor();
        let failed = run(&pipeline(), &mut g, call("words", json!({"word": "fail", "times": 1}))).await;
        assert_eq!(failed.error_kind(), Some(ToolErrorKind::ToolExecutionError));
        assert!(failed.output.contains("disk full"));

        let panicked = run(&pipeline(), &mut g, call("words", json!({"word": "boom", "times": 1}))).await;
        assert_eq!(panicked.error_kind(), Some(ToolErrorKind::ToolExecutionError));
        assert!(panicked.output.contains("word exploded"));
    }

    #[tokio::test(start_paused = true)]
    async fn refusal_from_the_tool_is_a_denial() {
        let mut g = governor();
        let result = run(&pipeline(), &mut g, call("words", json!({"word": "theirs", "times": 1}))).await;
        assert_eq!(result.error_kind(), Some(ToolErrorKind::ToolDenied));
        assert!(result.output.contains("belongs to another session"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_execution() {
        let p = pipeline();
        let mut g = governor();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            trigger.cancel();
        });
        let request = call("sleep", json!({"seconds": 10}));
        let result = p.execute(&request, &mut g, &ctx(), &cancel).await;
        assert_eq!(result.error_kind(), Some(ToolErrorKind::Cancelled));
        assert!(result.duration_ms < 10_000);
    }

    #[test]
    fn allowed_definitions_follow_allowlist() {
        let p = pipeline().with_allowlist(ToolAllowlist::from_names(["sleep"]));
        let names: Vec<String> = p.allowed_definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["sleep".to_string()]);
    }
}
