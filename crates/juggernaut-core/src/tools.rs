use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::ids::{SessionId, ToolCallId};

/// Context available to tools during execution.
pub struct ToolContext {
    pub session_id: SessionId,
    pub tool_call_id: ToolCallId,
    pub abort_signal: CancellationToken,
}

/// Tool definition sent to the LLM as part of the context.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: Value,
}

/// Result of one tool invocation. The executor wire format is
/// `{success: true, result}` or `{error}`; everything past that boundary uses this type.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success { result: Value },
    Failure { error: String },
}

impl ToolOutcome {
    pub fn success(result: impl Into<Value>) -> Self {
        Self::Success { result: result.into() }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure { error: error.into() }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failure { error } => Some(error),
            Self::Success { .. } => None,
        }
    }

    /// Map an executor response body onto an outcome. A body that is neither
    /// shape is treated as a failed call.
    pub fn from_wire(body: &Value) -> Self {
        if let Some(err) = body.get("error").filter(|e| !e.is_null()) {
            let error = match err {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return Self::Failure { error };
        }
        match body.get("success").and_then(Value::as_bool) {
            Some(true) => Self::Success {
                result: body.get("result").cloned().unwrap_or(Value::Null),
            },
            Some(false) => Self::failure("tool reported failure without an error message"),
            None => Self::failure(format!("malformed executor response: {body}")),
        }
    }

    pub fn to_wire(&self) -> Value {
        match self {
            Self::Success { result } => serde_json::json!({"success": true, "result": result}),
            Self::Failure { error } => serde_json::json!({"error": error}),
        }
    }

    /// Text placed in the tool-result message fed back to the model.
    pub fn content_text(&self) -> String {
        match self {
            Self::Success { result: Value::String(s) } => s.clone(),
            Self::Success { result } => result.to_string(),
            Self::Failure { error } => error.clone(),
        }
    }
}

/// Trait implemented by each tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutcome, ToolError>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters_schema: self.parameters_schema(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
    #[error("executor unavailable: {0}")]
    Unavailable(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("cancelled")]
    Cancelled,
}

impl ToolError {
    /// Errors worth one immediate retry: the call may not have reached the tool at all.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Unavailable(_))
    }
}

/// One entry in a session's ordered execution log.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRecord {
    pub tool_call_id: ToolCallId,
    pub tool_name: String,
    pub arguments: Value,
    pub outcome: ToolOutcome,
    pub success: bool,
    pub call_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_fingerprint: Option<String>,
    #[serde(rename = "duration_ms", with = "duration_ms")]
    pub duration: Duration,
    pub timestamp: DateTime<Utc>,
}

/// Serde helper for Duration as milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}
