use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not JSON, or a value has the wrong type for its key.
    #[error("bad settings in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{key} {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl SettingsError {
    pub(crate) fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_names_the_file() {
        let source = serde_json::from_str::<serde_json::Value>("{bad}").unwrap_err();
        let err = SettingsError::Parse {
            path: PathBuf::from("/etc/juggernaut/settings.json"),
            source,
        };
        assert!(err.to_string().starts_with("bad settings in /etc/juggernaut/settings.json: "));
    }

    #[test]
    fn invalid_reads_as_a_sentence() {
        let err = SettingsError::invalid("agent.maxIterationsCeiling", "must be within 1..=1000, got 5000");
        assert_eq!(
            err.to_string(),
            "agent.maxIterationsCeiling must be within 1..=1000, got 5000"
        );
    }
}
