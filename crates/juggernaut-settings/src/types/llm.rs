//! Chat-completion and tool executor settings.

use serde::{Deserialize, Serialize};

/// OpenAI-compatible chat-completions endpoint settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LlmSettings {
    pub base_url: String,
    /// Name of the environment variable holding the API key. The key itself
    /// never lives in the settings file.
    pub api_key_env: String,
    pub model: String,
    /// Tried in order when the primary model fails.
    pub fallback_models: Vec<String>,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Abort a stream that goes quiet for this long.
    pub stream_idle_timeout_secs: u64,
    /// Hard cap on attempts for a single LLM call across retries and model switches.
    pub max_attempts: u32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1".to_string(),
            api_key_env: "OPENROUTER_API_KEY".to_string(),
            model: "openai/gpt-4o-mini".to_string(),
            fallback_models: vec!["anthropic/claude-3.5-haiku".to_string()],
            max_tokens: 4096,
            request_timeout_secs: 120,
            connect_timeout_secs: 10,
            stream_idle_timeout_secs: 60,
            max_attempts: 6,
        }
    }
}

/// Remote tool executor settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolSettings {
    pub executor_url: String,
    pub timeout_secs: u64,
    /// Tool output longer than this is truncated before it reaches the model.
    pub max_output_bytes: usize,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            executor_url: "http://127.0.0.1:8791/execute".to_string(),
            timeout_secs: 30,
            max_output_bytes: 16 * 1024,
        }
    }
}
