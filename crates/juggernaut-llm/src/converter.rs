use serde_json::{json, Value};

use juggernaut_core::context::LlmContext;
use juggernaut_core::errors::LlmError;
use juggernaut_core::ids::ToolCallId;
use juggernaut_core::messages::{AssistantMessage, FinishReason, Message, ToolCallBlock};
use juggernaut_core::provider::{StreamOptions, ToolChoice};
use juggernaut_core::tokens::TokenUsage;

/// Convert an LlmContext into an OpenAI-compatible chat-completions body.
pub fn build_request_body(
    context: &LlmContext,
    options: &StreamOptions,
    model: &str,
    stream: bool,
) -> Value {
    let mut body = json!({
        "model": model,
        "messages": convert_messages(&context.messages),
        "stream": stream,
    });

    if stream {
        body["stream_options"] = json!({"include_usage": true});
    }
    if let Some(max) = options.max_tokens {
        body["max_tokens"] = json!(max);
    }
    if let Some(temp) = options.temperature {
        body["temperature"] = json!(temp);
    }

    // No tools means no tool_choice; some providers reject the pair otherwise.
    if !context.tools.is_empty() {
        let tools: Vec<Value> = context
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters_schema,
                    }
                })
            })
            .collect();
        body["tools"] = json!(tools);
        body["tool_choice"] = json!(match options.tool_choice {
            ToolChoice::Auto => "auto",
            ToolChoice::None => "none",
            ToolChoice::Required => "required",
        });
    }

    body
}

fn convert_messages(messages: &[Message]) -> Vec<Value> {
    messages.iter().map(convert_message).collect()
}

fn convert_message(message: &Message) -> Value {
    match message {
        Message::System { content } => json!({"role": "system", "content": content}),
        Message::User { content } => json!({"role": "user", "content": content}),
        Message::Assistant(a) => {
            let mut msg = json!({"role": "assistant"});
            msg["content"] = if a.text.is_empty() && a.has_tool_calls() {
                Value::Null
            } else {
                json!(a.text)
            };
            if a.has_tool_calls() {
                let calls: Vec<Value> = a
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id.as_str(),
                            "type": "function",
                            "function": {
                                "name": tc.name,
                                // The wire format carries arguments as a JSON string.
                                "arguments": tc.arguments.to_string(),
                            }
                        })
                    })
                    .collect();
                msg["tool_calls"] = json!(calls);
            }
            msg
        }
        Message::Tool(t) => json!({
            "role": "tool",
            "tool_call_id": t.tool_call_id.as_str(),
            "content": t.content,
        }),
    }
}

/// Parse a tool call's argument string. Empty means no arguments.
pub fn parse_arguments(raw: &str) -> Result<Value, LlmError> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(v @ Value::Object(_)) => Ok(v),
        Ok(other) => Err(LlmError::MalformedResponse(format!(
            "tool arguments must be a JSON object, got {other}"
        ))),
        Err(e) => Err(LlmError::MalformedResponse(format!(
            "unparseable tool arguments: {e}"
        ))),
    }
}

pub fn parse_usage(value: &Value) -> Option<TokenUsage> {
    let usage = value.as_object()?;
    Some(TokenUsage {
        prompt_tokens: usage.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
        completion_tokens: usage
            .get("completion_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
    })
}

/// Classify an `{"error": {...}}` payload returned in-band.
pub fn classify_error_payload(error: &Value) -> LlmError {
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown provider error")
        .to_string();
    let status = error
        .get("code")
        .and_then(|c| c.as_u64().or_else(|| c.as_str().and_then(|s| s.parse().ok())))
        .and_then(|c| u16::try_from(c).ok());
    match status {
        Some(status) => LlmError::from_status(status, message, None),
        None => LlmError::ServerError { status: 500, body: message },
    }
}

/// Parse a non-streaming chat-completions response body.
pub fn parse_completion(body: &Value) -> Result<(AssistantMessage, FinishReason), LlmError> {
    if let Some(error) = body.get("error") {
        return Err(classify_error_payload(error));
    }

    let choice = body
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| LlmError::MalformedResponse("response has no choices".into()))?;
    let message = choice
        .get("message")
        .ok_or_else(|| LlmError::MalformedResponse("choice has no message".into()))?;

    let text = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let mut tool_calls = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        for call in calls {
            let function = call
                .get("function")
                .ok_or_else(|| LlmError::MalformedResponse("tool call has no function".into()))?;
            let name = function
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| LlmError::MalformedResponse("tool call has no name".into()))?;
            let arguments = match function.get("arguments") {
                Some(Value::String(raw)) => parse_arguments(raw)?,
                Some(v @ Value::Object(_)) => v.clone(),
                _ => Value::Object(serde_json::Map::new()),
            };
            let id = call
                .get("id")
                .and_then(Value::as_str)
                .map(ToolCallId::from_raw)
                .unwrap_or_default();
            tool_calls.push(ToolCallBlock {
                id,
                name: name.to_string(),
                arguments,
            });
        }
    }

    let finish_reason = match choice.get("finish_reason").and_then(Value::as_str) {
        Some(raw) => FinishReason::parse(raw),
        None if !tool_calls.is_empty() => FinishReason::ToolCalls,
        None => FinishReason::Stop,
    };

    Ok((
        AssistantMessage {
            text,
            tool_calls,
            usage: body.get("usage").and_then(parse_usage),
        },
        finish_reason,
    ))
}
