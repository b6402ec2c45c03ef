use std::collections::BTreeMap;

use serde_json::Value;

use juggernaut_core::errors::LlmError;
use juggernaut_core::ids::ToolCallId;
use juggernaut_core::messages::{AssistantMessage, FinishReason, ToolCallBlock};
use juggernaut_core::stream::StreamEvent;
use juggernaut_core::tokens::TokenUsage;

use crate::converter;

/// State machine for OpenAI-style `chat.completion.chunk` streams.
///
/// Text arrives as `delta.content` fragments. Tool calls arrive as fragments
/// keyed by `index`: the first fragment carries `id` and `function.name`, later
/// ones append to `function.arguments`. Calls are closed when a `finish_reason`
/// arrives and the message is complete on `[DONE]` or end of stream.
#[derive(Default)]
pub struct ChatStreamParser {
    started: bool,
    text: String,
    tool_calls: BTreeMap<usize, PartialToolCall>,
    completed_calls: Vec<ToolCallBlock>,
    calls_closed: bool,
    finish_reason: Option<FinishReason>,
    usage: Option<TokenUsage>,
    finished: bool,
}

#[derive(Default)]
struct PartialToolCall {
    id: Option<String>,
    name: String,
    arguments: String,
    announced: bool,
}

impl ChatStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a terminal event has been produced.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Parse one `data:` payload and return zero or more StreamEvents.
    pub fn parse_data(&mut self, data: &str) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        let data = data.trim();
        if data == "[DONE]" {
            return self.finish();
        }

        let chunk: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                return self.fail(LlmError::MalformedResponse(format!("invalid stream chunk: {e}")))
            }
        };

        if let Some(error) = chunk.get("error") {
            return self.fail(converter::classify_error_payload(error));
        }

        let mut events = Vec::new();
        if !self.started {
            self.started = true;
            events.push(StreamEvent::Start);
        }

        if let Some(usage) = chunk.get("usage").and_then(converter::parse_usage) {
            self.usage = Some(usage);
        }

        let Some(choice) = chunk.get("choices").and_then(|c| c.get(0)) else {
            return events;
        };

        if let Some(delta) = choice.get("delta") {
            if let Some(content) = delta.get("content").and_then(Value::as_str) {
                if !content.is_empty() {
                    self.text.push_str(content);
                    events.push(StreamEvent::TextDelta { delta: content.to_string() });
                }
            }
            if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
                for fragment in calls {
                    self.accumulate_tool_fragment(fragment, &mut events);
                }
            }
        }

        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            self.finish_reason = Some(FinishReason::parse(reason));
            if let Err(error) = self.close_tool_calls(&mut events) {
                events.extend(self.fail(error));
            }
        }

        events
    }

    /// Complete the message. Called on `[DONE]` or when the byte stream ends.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        if !self.started {
            return self.fail(LlmError::MalformedResponse(
                "stream ended before any data".into(),
            ));
        }

        let mut events = Vec::new();
        if let Err(error) = self.close_tool_calls(&mut events) {
            events.extend(self.fail(error));
            return events;
        }

        let tool_calls = std::mem::take(&mut self.completed_calls);
        let finish_reason = self.finish_reason.take().unwrap_or(if tool_calls.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolCalls
        });
        let message = AssistantMessage {
            text: std::mem::take(&mut self.text),
            tool_calls,
            usage: self.usage.take(),
        };
        self.finished = true;
        events.push(StreamEvent::Done { message, finish_reason });
        events
    }

    fn fail(&mut self, error: LlmError) -> Vec<StreamEvent> {
        self.finished = true;
        vec![StreamEvent::Error { error }]
    }

    fn accumulate_tool_fragment(&mut self, fragment: &Value, events: &mut Vec<StreamEvent>) {
        let index = fragment
            .get("index")
            .and_then(Value::as_u64)
            .unwrap_or(self.tool_calls.len() as u64) as usize;
        let call = self.tool_calls.entry(index).or_default();

        if let Some(id) = fragment.get("id").and_then(Value::as_str) {
            call.id.get_or_insert_with(|| id.to_string());
        }
        let function = fragment.get("function");
        if let Some(name) = function.and_then(|f| f.get("name")).and_then(Value::as_str) {
            call.name.push_str(name);
        }
        if !call.announced && !call.name.is_empty() {
            call.announced = true;
            let id = call.id.get_or_insert_with(|| ToolCallId::new().to_string()).clone();
            events.push(StreamEvent::ToolCallStart {
                index,
                tool_call_id: ToolCallId::from_raw(id),
                name: call.name.clone(),
            });
        }
        if let Some(args) = function.and_then(|f| f.get("arguments")).and_then(Value::as_str) {
            if !args.is_empty() {
                call.arguments.push_str(args);
                events.push(StreamEvent::ToolCallDelta {
                    index,
                    arguments_delta: args.to_string(),
                });
            }
        }
    }

    fn close_tool_calls(&mut self, events: &mut Vec<StreamEvent>) -> Result<(), LlmError> {
        if self.calls_closed {
            return Ok(());
        }
        self.calls_closed = true;

        for (_, call) in std::mem::take(&mut self.tool_calls) {
            if call.name.is_empty() {
                return Err(LlmError::MalformedResponse("tool call without a name".into()));
            }
            let arguments = converter::parse_arguments(&call.arguments)?;
            let block = ToolCallBlock {
                id: call.id.map(ToolCallId::from_raw).unwrap_or_default(),
                name: call.name,
                arguments,
            };
            events.push(StreamEvent::ToolCallEnd { tool_call: block.clone() });
            self.completed_calls.push(block);
        }
        Ok(())
    }
}

/// Extract `data:` payloads from one or more raw SSE events. Comment lines
/// (`: keep-alive`) and `event:`/`id:` fields are ignored.
pub fn parse_sse_lines(raw: &str) -> Vec<String> {
    let mut payloads = Vec::new();
    let mut current: Option<String> = None;

    for line in raw.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            if let Some(data) = current.take() {
                payloads.push(data);
            }
            continue;
        }
        if let Some(data) = line.strip_prefix("data:") {
            let data = data.strip_prefix(' ').unwrap_or(data);
            match current.as_mut() {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(data);
                }
                None => current = Some(data.to_string()),
            }
        }
    }

    // Handle trailing event without blank line
    if let Some(data) = current {
        payloads.push(data);
    }

    payloads
}
