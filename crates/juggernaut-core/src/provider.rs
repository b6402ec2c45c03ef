use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::context::LlmContext;
use crate::errors::LlmError;
use crate::stream::StreamEvent;

/// Incremental output of one completion. Ends after `Done` or `Error`.
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

#[derive(Clone, Debug, Default)]
pub struct StreamOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    /// Used instead of the provider's default model. Set when falling back to a cheaper model.
    pub model: Option<String>,
    pub tool_choice: ToolChoice,
}

impl StreamOptions {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Whether the model may, must, or must not call tools.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
    Required,
}

/// A chat-completion backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short backend name used in logs, e.g. `openrouter`.
    fn name(&self) -> &str;
    /// Model used when [`StreamOptions::model`] is unset.
    fn model(&self) -> &str;
    fn context_window(&self) -> usize;
    fn supports_tools(&self) -> bool;

    /// USD for one call. Backends without a price table report zero.
    fn cost_usd(&self, _model: &str, _prompt_tokens: u32, _completion_tokens: u32) -> f64 {
        0.0
    }

    async fn stream(
        &self,
        context: &LlmContext,
        options: &StreamOptions,
    ) -> Result<EventStream, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_options_defaults() {
        let opts = StreamOptions::default();
        assert!(opts.max_tokens.is_none());
        assert!(opts.model.is_none());
        assert_eq!(opts.tool_choice, ToolChoice::Auto);
    }

    #[test]
    fn with_model_overrides() {
        let opts = StreamOptions::default().with_model("openai/gpt-4o-mini");
        assert_eq!(opts.model.as_deref(), Some("openai/gpt-4o-mini"));
    }

    #[test]
    fn tool_choice_wire_names() {
        assert_eq!(serde_json::to_string(&ToolChoice::Auto).unwrap(), r#""auto""#);
        assert_eq!(serde_json::to_string(&ToolChoice::None).unwrap(), r#""none""#);
    }
}
