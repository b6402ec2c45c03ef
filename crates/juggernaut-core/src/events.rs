use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ErrorCategory;
use crate::ids::{SessionId, ToolCallId};
use crate::mode::AgentMode;
use crate::stop::{BudgetReason, GuardrailReason, StopReason};
use crate::tokens::AccumulatedTokens;
use crate::tools::ToolCallRecord;

/// Controller states. `Idle` and `Stopped` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Thinking,
    Reasoning,
    ToolRunning,
    Summarizing,
    Idle,
    Stopped,
}

impl LoopState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Thinking => "thinking",
            Self::Reasoning => "reasoning",
            Self::ToolRunning => "tool_running",
            Self::Summarizing => "summarizing",
            Self::Idle => "idle",
            Self::Stopped => "stopped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Idle | Self::Stopped)
    }
}

/// Lifecycle events streamed to whoever started a session.
///
/// Order: session → status → token* → tool_start → tool_result → budget → guardrails? → done.
/// `done` is always the last event of a session, including aborted ones.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum SessionEvent {
    #[serde(rename = "session")]
    Session {
        session_id: SessionId,
        mode: AgentMode,
        model: String,
        max_iterations: u32,
    },

    #[serde(rename = "status")]
    Status { state: LoopState },

    #[serde(rename = "token")]
    Token { delta: String },

    #[serde(rename = "tool_start")]
    ToolStart {
        tool_call_id: ToolCallId,
        tool_name: String,
        arguments: Value,
    },

    #[serde(rename = "tool_result")]
    ToolResult {
        tool_call_id: ToolCallId,
        tool_name: String,
        success: bool,
        preview: String,
        duration_ms: u64,
    },

    #[serde(rename = "budget")]
    Budget {
        steps_used: u32,
        steps_max: u32,
        elapsed_ms: u64,
        wall_clock_max_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exceeded: Option<BudgetReason>,
    },

    #[serde(rename = "guardrails")]
    Guardrails {
        reason: GuardrailReason,
        detail: String,
        suggestion: String,
    },

    /// An LLM call failed and the recovery policy chose a next step.
    #[serde(rename = "recovery")]
    Recovery {
        category: ErrorCategory,
        action: String,
        attempt: u32,
        model: String,
        message: String,
    },

    #[serde(rename = "error")]
    Error { code: String, message: String },

    #[serde(rename = "done")]
    Done {
        final_answer: Option<String>,
        usage: AccumulatedTokens,
        tool_log: Vec<ToolCallRecord>,
        stop_reason: Option<StopReason>,
        iterations: u32,
    },
}

impl SessionEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Session { .. } => "session",
            Self::Status { .. } => "status",
            Self::Token { .. } => "token",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolResult { .. } => "tool_result",
            Self::Budget { .. } => "budget",
            Self::Guardrails { .. } => "guardrails",
            Self::Recovery { .. } => "recovery",
            Self::Error { .. } => "error",
            Self::Done { .. } => "done",
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_matches_serde_tag() {
        let events = vec![
            SessionEvent::Session {
                session_id: SessionId::from_raw("sess_1"),
                mode: AgentMode::Ops,
                model: "m".into(),
                max_iterations: 6,
            },
            SessionEvent::Status { state: LoopState::ToolRunning },
            SessionEvent::Token { delta: "hi".into() },
            SessionEvent::Budget {
                steps_used: 1,
                steps_max: 50,
                elapsed_ms: 10,
                wall_clock_max_ms: 120_000,
                exceeded: None,
            },
            SessionEvent::Guardrails {
                reason: GuardrailReason::ToolLoop,
                detail: "d".into(),
                suggestion: "s".into(),
            },
            SessionEvent::Error { code: "LLM_AUTH".into(), message: "m".into() },
            SessionEvent::Done {
                final_answer: None,
                usage: AccumulatedTokens::default(),
                tool_log: vec![],
                stop_reason: Some(StopReason::Cancelled),
                iterations: 0,
            },
        ];
        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], event.event_type());
        }
    }

    #[test]
    fn status_wire_shape() {
        let json = serde_json::to_value(SessionEvent::Status { state: LoopState::ToolRunning }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "status", "state": "tool_running"}));
    }

    #[test]
    fn done_carries_stop_reason() {
        let event = SessionEvent::Done {
            final_answer: None,
            usage: AccumulatedTokens::default(),
            tool_log: vec![],
            stop_reason: Some(StopReason::MaxIterationsReached { iterations: 6 }),
            iterations: 6,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["stop_reason"]["code"], "MAX_ITERATIONS_REACHED");
        let back: SessionEvent = serde_json::from_value(json).unwrap();
        assert!(back.is_done());
    }

    #[test]
    fn terminal_states() {
        assert!(LoopState::Idle.is_terminal());
        assert!(LoopState::Stopped.is_terminal());
        assert!(!LoopState::Summarizing.is_terminal());
    }
}
