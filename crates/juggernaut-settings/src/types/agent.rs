//! Agent loop, guardrail and notification settings.

use juggernaut_core::AgentMode;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentSettings {
    pub default_mode: AgentMode,
    /// Upper bound on iterations for any mode (1..=1000).
    pub max_iterations_ceiling: u32,
    /// Replace final answers that cite facts absent from tool output.
    pub evidence_check: bool,
    pub guardrails: GuardrailSettings,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            default_mode: AgentMode::Normal,
            max_iterations_ceiling: 30,
            evidence_check: true,
            guardrails: GuardrailSettings::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GuardrailSettings {
    pub max_failures_per_fingerprint: u32,
    pub max_no_progress_steps: u32,
    /// Number of identical consecutive tool names that counts as a loop.
    pub tool_loop_window: usize,
}

impl Default for GuardrailSettings {
    fn default() -> Self {
        Self {
            max_failures_per_fingerprint: 3,
            max_no_progress_steps: 5,
            tool_loop_window: 5,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationSettings {
    /// Webhook that receives abnormal-stop notices. Disabled when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}
