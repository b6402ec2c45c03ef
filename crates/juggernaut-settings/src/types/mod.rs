//! Settings types, one module per concern.

mod agent;
mod llm;
mod server;

pub use agent::{AgentSettings, GuardrailSettings, NotificationSettings};
pub use llm::{LlmSettings, ToolSettings};
pub use server::{LoggingSettings, ServerSettings, StorageSettings};

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object. Every section is defaulted, so a partial file is valid.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JuggernautSettings {
    pub server: ServerSettings,
    pub llm: LlmSettings,
    pub tools: ToolSettings,
    pub agent: AgentSettings,
    pub notifications: NotificationSettings,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

impl JuggernautSettings {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let ceiling = self.agent.max_iterations_ceiling;
        if !(1..=1000).contains(&ceiling) {
            return Err(SettingsError::invalid(
                "agent.maxIterationsCeiling",
                format!("must be within 1..=1000, got {ceiling}"),
            ));
        }
        let g = &self.agent.guardrails;
        let positive = [
            ("agent.guardrails.maxFailuresPerFingerprint", g.max_failures_per_fingerprint as usize),
            ("agent.guardrails.maxNoProgressSteps", g.max_no_progress_steps as usize),
            ("agent.guardrails.toolLoopWindow", g.tool_loop_window),
            ("server.eventBufferSize", self.server.event_buffer_size),
            ("llm.maxAttempts", self.llm.max_attempts as usize),
        ];
        if let Some(&(key, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(SettingsError::invalid(key, "must be at least 1"));
        }
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        resolve_path(&self.storage.db_path)
    }

    pub fn log_db_path(&self) -> PathBuf {
        resolve_path(&self.logging.log_db_path)
    }
}

/// `~/.juggernaut`, falling back to `/tmp` when `HOME` is unset.
pub fn juggernaut_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".juggernaut")
}

fn resolve_path(raw: &str) -> PathBuf {
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        path
    } else {
        juggernaut_home().join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = JuggernautSettings::default();
        settings.validate().unwrap();
        assert_eq!(settings.agent.guardrails.max_failures_per_fingerprint, 3);
        assert_eq!(settings.agent.guardrails.max_no_progress_steps, 5);
        assert_eq!(settings.agent.guardrails.tool_loop_window, 5);
        assert_eq!(settings.agent.max_iterations_ceiling, 30);
        assert_eq!(settings.llm.api_key_env, "OPENROUTER_API_KEY");
        assert!(settings.notifications.webhook_url.is_none());
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(JuggernautSettings::default()).unwrap();
        assert_eq!(json["agent"]["maxIterationsCeiling"], 30);
        assert_eq!(json["agent"]["defaultMode"], "normal");
        assert_eq!(json["server"]["eventBufferSize"], 64);
        assert!(json["notifications"].get("webhookUrl").is_none());
    }

    #[test]
    fn ceiling_out_of_range_rejected() {
        let mut settings = JuggernautSettings::default();
        settings.agent.max_iterations_ceiling = 0;
        assert!(matches!(settings.validate(), Err(SettingsError::Invalid { .. })));
        settings.agent.max_iterations_ceiling = 1001;
        assert!(settings.validate().is_err());
        settings.agent.max_iterations_ceiling = 1000;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn absolute_paths_kept() {
        let mut settings = JuggernautSettings::default();
        settings.storage.db_path = "/var/lib/juggernaut/db.sqlite".to_string();
        assert_eq!(settings.db_path(), PathBuf::from("/var/lib/juggernaut/db.sqlite"));
        assert!(settings.log_db_path().ends_with(".juggernaut/logs.db"));
    }
}
