use serde::{Deserialize, Serialize};

use crate::errors::LlmError;

/// Which budget counter crossed its ceiling, in priority order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetReason {
    Steps,
    Time,
    Retries,
    NoProgress,
}

impl BudgetReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Steps => "steps",
            Self::Time => "time",
            Self::Retries => "retries",
            Self::NoProgress => "no_progress",
        }
    }
}

/// Which guardrail halted the loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailReason {
    RepeatedFailure,
    NoProgress,
    ToolLoop,
    RepeatedCall,
    CircuitOpen,
}

impl GuardrailReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RepeatedFailure => "repeated_failure",
            Self::NoProgress => "no_progress",
            Self::ToolLoop => "tool_loop",
            Self::RepeatedCall => "repeated_call",
            Self::CircuitOpen => "circuit_open",
        }
    }
}

impl std::fmt::Display for GuardrailReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured reason a session ended early. A session that finished with a final
/// answer carries no stop reason.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopReason {
    BudgetExceeded { reason: BudgetReason },
    GuardrailTriggered { reason: GuardrailReason, detail: String },
    MaxIterationsReached { iterations: u32 },
    LlmRateLimit { message: String },
    LlmTimeout { message: String },
    LlmAuth { message: String },
    LlmMalformedResponse { message: String },
    LlmError { message: String },
    Cancelled,
}

impl StopReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::BudgetExceeded { .. } => "BUDGET_EXCEEDED",
            Self::GuardrailTriggered { .. } => "GUARDRAIL_TRIGGERED",
            Self::MaxIterationsReached { .. } => "MAX_ITERATIONS_REACHED",
            Self::LlmRateLimit { .. } => "LLM_RATE_LIMIT",
            Self::LlmTimeout { .. } => "LLM_TIMEOUT",
            Self::LlmAuth { .. } => "LLM_AUTH",
            Self::LlmMalformedResponse { .. } => "LLM_MALFORMED_RESPONSE",
            Self::LlmError { .. } => "LLM_ERROR",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Short label: the sub-reason for budget/guardrail stops, the code otherwise.
    pub fn label(&self) -> String {
        match self {
            Self::BudgetExceeded { reason } => format!("budget_exceeded:{}", reason.as_str()),
            Self::GuardrailTriggered { reason, .. } => reason.as_str().to_string(),
            other => other.code().to_lowercase(),
        }
    }

    pub fn guardrail(&self) -> Option<GuardrailReason> {
        match self {
            Self::GuardrailTriggered { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    /// Whether an operator should hear about this stop.
    pub fn is_abnormal(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

impl From<&LlmError> for StopReason {
    fn from(e: &LlmError) -> Self {
        let message = e.to_string();
        match e {
            LlmError::RateLimited { .. } => Self::LlmRateLimit { message },
            LlmError::Timeout(_) | LlmError::StreamInterrupted(_) => Self::LlmTimeout { message },
            LlmError::AuthenticationFailed(_) => Self::LlmAuth { message },
            LlmError::MalformedResponse(_) => Self::LlmMalformedResponse { message },
            LlmError::Cancelled => Self::Cancelled,
            _ => Self::LlmError { message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn wire_shape() {
        let stop = StopReason::GuardrailTriggered {
            reason: GuardrailReason::RepeatedCall,
            detail: "sql_query repeated".into(),
        };
        let json = serde_json::to_value(&stop).unwrap();
        assert_eq!(json["code"], "GUARDRAIL_TRIGGERED");
        assert_eq!(json["reason"], "repeated_call");

        let budget = StopReason::BudgetExceeded { reason: BudgetReason::NoProgress };
        let json = serde_json::to_value(&budget).unwrap();
        assert_eq!(json["code"], "BUDGET_EXCEEDED");
        assert_eq!(json["reason"], "no_progress");
    }

    #[test]
    fn labels() {
        let stop = StopReason::GuardrailTriggered {
            reason: GuardrailReason::ToolLoop,
            detail: String::new(),
        };
        assert_eq!(stop.label(), "tool_loop");
        assert_eq!(
            StopReason::BudgetExceeded { reason: BudgetReason::Time }.label(),
            "budget_exceeded:time"
        );
        assert_eq!(StopReason::MaxIterationsReached { iterations: 6 }.label(), "max_iterations_reached");
    }

    #[test]
    fn from_llm_error() {
        let stop = StopReason::from(&LlmError::Timeout(Duration::from_secs(1)));
        assert_eq!(stop.code(), "LLM_TIMEOUT");
        let stop = StopReason::from(&LlmError::AuthenticationFailed("nope".into()));
        assert_eq!(stop.code(), "LLM_AUTH");
        let stop = StopReason::from(&LlmError::ServerError { status: 500, body: String::new() });
        assert_eq!(stop.code(), "LLM_ERROR");
    }

    #[test]
    fn cancelled_is_not_abnormal() {
        assert!(!StopReason::Cancelled.is_abnormal());
        assert!(StopReason::MaxIterationsReached { iterations: 1 }.is_abnormal());
    }
}
