use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;
use serde_json::Value;

use juggernaut_core::context::LlmContext;
use juggernaut_core::errors::LlmError;
use juggernaut_core::ids::ToolCallId;
use juggernaut_core::messages::{AssistantMessage, FinishReason, ToolCallBlock};
use juggernaut_core::provider::{EventStream, LlmProvider, StreamOptions};
use juggernaut_core::stream::StreamEvent;
use juggernaut_core::tokens::TokenUsage;

/// Pre-programmed responses for deterministic testing without API calls.
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Yield a sequence of StreamEvents.
    Stream(Vec<StreamEvent>),
    /// Return an error from the stream() call itself.
    Error(LlmError),
    /// Wait a duration, then yield the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    /// A plain text answer.
    pub fn stream_text(text: &str) -> Self {
        let mut message = AssistantMessage::text(text);
        message.usage = Some(TokenUsage { prompt_tokens: 10, completion_tokens: 5 });
        Self::Stream(vec![
            StreamEvent::Start,
            StreamEvent::TextDelta { delta: text.to_string() },
            StreamEvent::Done { message, finish_reason: FinishReason::Stop },
        ])
    }

    /// An assistant turn that requests the given tool calls, in order.
    pub fn tool_calls(calls: Vec<(&str, Value)>) -> Self {
        let blocks: Vec<ToolCallBlock> = calls
            .into_iter()
            .map(|(name, arguments)| ToolCallBlock {
                id: ToolCallId::new(),
                name: name.to_string(),
                arguments,
            })
            .collect();

        let mut events = vec![StreamEvent::Start];
        for (index, block) in blocks.iter().enumerate() {
            events.push(StreamEvent::ToolCallStart {
                index,
                tool_call_id: block.id.clone(),
                name: block.name.clone(),
            });
            events.push(StreamEvent::ToolCallDelta {
                index,
                arguments_delta: block.arguments.to_string(),
            });
        }
        for block in &blocks {
            events.push(StreamEvent::ToolCallEnd { tool_call: block.clone() });
        }
        events.push(StreamEvent::Done {
            message: AssistantMessage {
                text: String::new(),
                tool_calls: blocks,
                usage: Some(TokenUsage { prompt_tokens: 10, completion_tokens: 5 }),
            },
            finish_reason: FinishReason::ToolCalls,
        });
        Self::Stream(events)
    }

    /// A stream that starts and then fails mid-flight.
    pub fn stream_error(error: LlmError) -> Self {
        Self::Stream(vec![StreamEvent::Start, StreamEvent::Error { error }])
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// What the provider was asked for on one call.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedCall {
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub tool_count: usize,
    pub message_count: usize,
}

/// Mock provider that returns pre-programmed responses in sequence.
///
/// Once the script is exhausted it answers with the `always` response if one
/// was set, otherwise with an `InvalidRequest` error.
pub struct MockProvider {
    responses: Vec<MockResponse>,
    always: Option<MockResponse>,
    call_count: AtomicUsize,
    calls: Mutex<Vec<RecordedCall>>,
    model: String,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses,
            always: None,
            call_count: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            model: "mock-model".to_string(),
        }
    }

    /// Repeat the same response forever.
    pub fn always(response: MockResponse) -> Self {
        Self::new(Vec::new()).with_fallback(response)
    }

    pub fn with_fallback(mut self, response: MockResponse) -> Self {
        self.always = Some(response);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn context_window(&self) -> usize {
        128_000
    }

    fn supports_tools(&self) -> bool {
        true
    }

    async fn stream(
        &self,
        context: &LlmContext,
        options: &StreamOptions,
    ) -> Result<EventStream, LlmError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.calls.lock().push(RecordedCall {
            model: options.model.clone(),
            max_tokens: options.max_tokens,
            tool_count: context.tools.len(),
            message_count: context.messages.len(),
        });

        let response = match self.responses.get(idx).or(self.always.as_ref()) {
            Some(r) => r,
            None => {
                return Err(LlmError::InvalidRequest(format!(
                    "MockProvider: no response configured for call {idx}"
                )))
            }
        };
        resolve_response(response).await
    }
}

/// Unrolls nested delays iteratively to avoid recursive async.
async fn resolve_response(response: &MockResponse) -> Result<EventStream, LlmError> {
    let mut current = response;
    loop {
        match current {
            MockResponse::Stream(events) => {
                return Ok(Box::pin(stream::iter(events.clone())));
            }
            MockResponse::Error(e) => return Err(e.clone()),
            MockResponse::Delay(duration, inner) => {
                tokio::time::sleep(*duration).await;
                current = inner;
            }
        }
    }
}
