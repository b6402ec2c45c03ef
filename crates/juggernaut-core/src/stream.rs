use crate::errors::LlmError;
use crate::ids::ToolCallId;
use crate::messages::{AssistantMessage, FinishReason, ToolCallBlock};

/// One step of a streamed completion.
///
/// A well-formed stream opens with `Start`, interleaves text and tool-call fragments,
/// closes each tool call with `ToolCallEnd`, and finishes with exactly one `Done`.
/// `Error` may replace `Done` at any point.
#[derive(Clone, Debug)]
pub enum StreamEvent {
    Start,
    TextDelta {
        delta: String,
    },
    /// `index` is the provider's slot for this call; later deltas refer to it.
    ToolCallStart {
        index: usize,
        tool_call_id: ToolCallId,
        name: String,
    },
    ToolCallDelta {
        index: usize,
        arguments_delta: String,
    },
    ToolCallEnd {
        tool_call: ToolCallBlock,
    },
    Done {
        message: AssistantMessage,
        finish_reason: FinishReason,
    },
    Error {
        error: LlmError,
    },
}

impl StreamEvent {
    /// Nothing follows a terminal event.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}
