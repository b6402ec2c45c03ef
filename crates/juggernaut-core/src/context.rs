use crate::messages::Message;
use crate::tools::ToolDefinition;

/// Everything one chat-completion request carries: the transcript so far and the tools the
/// model may call.
#[derive(Clone, Debug, Default)]
pub struct LlmContext {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
}

impl LlmContext {
    pub fn new(messages: Vec<Message>, tools: Vec<ToolDefinition>) -> Self {
        Self { messages, tools }
    }
}
