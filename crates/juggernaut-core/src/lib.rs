pub mod context;
pub mod errors;
pub mod events;
pub mod ids;
pub mod messages;
pub mod mode;
pub mod provider;
pub mod requests;
pub mod stop;
pub mod stream;
pub mod tokens;
pub mod tools;

pub use errors::{ErrorCategory, LlmError};
pub use events::{LoopState, SessionEvent};
pub use ids::{FallbackTaskId, SessionId, ToolCallId};
pub use messages::{AssistantMessage, Conversation, Message, ToolCallBlock};
pub use mode::AgentMode;
pub use stop::{BudgetReason, GuardrailReason, StopReason};
pub use tools::{ToolCallRecord, ToolOutcome};
