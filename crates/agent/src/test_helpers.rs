//! Shared test helpers for invoker and loop tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use runwarden_core::error::ProviderError;
use runwarden_core::message::{Message, MessageToolCall};
use runwarden_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};

/// One scripted reaction of the mock provider.
pub enum Step {
    Reply(ProviderResponse),
    Fail(ProviderError),
    /// Never completes; exercises timeouts and cancellation.
    Hang,
}

/// A mock provider that plays back a sequence of scripted steps.
///
/// Each call to `complete` consumes the next step and records the request.
/// Running out of steps is reported as a non-retriable error.
pub struct SequentialMockProvider {
    steps: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl SequentialMockProvider {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn replies(responses: Vec<ProviderResponse>) -> Self {
        Self::new(responses.into_iter().map(Step::Reply).collect())
    }

    /// Create a provider that returns a single text response (no tool calls).
    pub fn single_text(text: &str) -> Self {
        Self::replies(vec![make_text_response(text)])
    }

    /// Create a provider that first returns tool calls, then a final answer.
    pub fn tool_then_answer(tool_calls: Vec<MessageToolCall>, thought: &str, answer: &str) -> Self {
        Self::replies(vec![
            make_tool_call_response(tool_calls, thought),
            make_text_response(answer),
        ])
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn models_requested(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.model).collect()
    }
}

#[async_trait::async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Reply(response)) => Ok(response),
            Some(Step::Fail(error)) => Err(error),
            Some(Step::Hang) => std::future::pending().await,
            None => Err(ProviderError::ApiError {
                status_code: 400,
                message: "script exhausted".into(),
            }),
        }
    }
}

fn usage() -> Usage {
    Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
        cost: None,
    }
}

/// Create a simple text response (no tool calls).
pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(usage()),
        model: "mock".into(),
    }
}

/// Create a response requesting tool calls, with optional thought text.
pub fn make_tool_call_response(tool_calls: Vec<MessageToolCall>, thought: &str) -> ProviderResponse {
    let mut message = Message::assistant(thought);
    message.tool_calls = tool_calls;
    ProviderResponse {
        message,
        usage: Some(usage()),
        model: "mock".into(),
    }
}

/// Create a tool call with JSON arguments.
pub fn make_tool_call(id: &str, name: &str, args: serde_json::Value) -> MessageToolCall {
    MessageToolCall {
        id: id.into(),
        name: name.into(),
        arguments: args.to_string(),
    }
}
