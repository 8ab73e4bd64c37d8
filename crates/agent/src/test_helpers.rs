//! Scripted providers and tools for engine tests.
//!
//! Public so integration tests in other crates can drive the engine
//! without a network.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use weaver_core::error::{ProviderError, ToolError};
use weaver_core::message::{Message, MessageToolCall};
use weaver_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use weaver_core::tool::{Tool, ToolContext, ToolResult};

/// A mock provider that returns a sequence of scripted responses.
///
/// Each call to `complete` returns the next response in the queue and
/// records the request it was given. Running out of responses is an
/// `InvalidResponse` error rather than a panic.
pub struct SequentialMockProvider {
    responses: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
    delay: Option<Duration>,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Ok).collect()),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Create a provider that returns a single text response (no tool calls).
    pub fn single_text(text: &str) -> Self {
        Self::new(vec![make_text_response(text)])
    }

    /// Create a provider that first returns a tool call, then a final answer.
    pub fn tool_then_answer(tool_call: MessageToolCall, thought: &str, answer: &str) -> Self {
        Self::new(vec![
            make_tool_call_response(tool_call, thought),
            make_text_response(answer),
        ])
    }

    /// A provider whose first call fails with `error`.
    pub fn failing(error: ProviderError) -> Self {
        Self {
            responses: Mutex::new(VecDeque::from([Err(error)])),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Sleep this long before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Every request seen so far, in call order.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let call = {
            let mut requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
            requests.push(request);
            requests.len()
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| {
                Err(ProviderError::InvalidResponse(format!(
                    "no scripted response for call #{call}"
                )))
            })
    }
}

fn mock_usage() -> Option<Usage> {
    Some(Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    })
}

/// Create a simple text response (no tool calls).
pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: mock_usage(),
        model: "mock-model".into(),
    }
}

/// Create a response carrying one tool call and optional thought content.
pub fn make_tool_call_response(tool_call: MessageToolCall, thought: &str) -> ProviderResponse {
    let mut msg = Message::assistant(thought);
    msg.tool_calls = vec![tool_call];
    ProviderResponse {
        message: msg,
        usage: mock_usage(),
        model: "mock-model".into(),
    }
}

/// Helper to create a tool call with id `call_<name>`.
pub fn make_tool_call(name: &str, args: serde_json::Value) -> MessageToolCall {
    MessageToolCall {
        id: format!("call_{name}"),
        name: name.to_string(),
        arguments: args.to_string(),
    }
}

/// A tool that records its calls and answers with a fixed output.
pub struct RecordingTool {
    name: String,
    output: String,
    confirm: bool,
    calls: Mutex<Vec<(ToolContext, serde_json::Value)>>,
}

impl RecordingTool {
    pub fn new(name: &str, output: &str) -> Self {
        Self {
            name: name.to_string(),
            output: output.to_string(),
            confirm: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Mark the tool destructive so the engine pauses before running it.
    pub fn requiring_confirmation(mut self) -> Self {
        self.confirm = true;
        self
    }

    pub fn calls(&self) -> Vec<(ToolContext, serde_json::Value)> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Tool for RecordingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Records its calls"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object" })
    }

    fn requires_confirmation(&self) -> bool {
        self.confirm
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        arguments: serde_json::Value,
    ) -> Result<ToolResult, ToolError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((ctx.clone(), arguments));
        Ok(ToolResult::ok(self.output.clone()))
    }
}

/// A tool that waits until its context is cancelled.
pub struct BlockingTool;

#[async_trait]
impl Tool for BlockingTool {
    fn name(&self) -> &str {
        "wait_forever"
    }

    fn description(&self) -> &str {
        "Blocks until cancelled"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object" })
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        _arguments: serde_json::Value,
    ) -> Result<ToolResult, ToolError> {
        ctx.cancellation.cancelled().await;
        Err(ToolError::Cancelled(self.name().to_string()))
    }
}
