use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Operating profile selected per session. Drives budget defaults and the
/// iteration cap.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentMode {
    #[default]
    Normal,
    DeepResearch,
    Code,
    Ops,
}

impl AgentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::DeepResearch => "deep_research",
            Self::Code => "code",
            Self::Ops => "ops",
        }
    }

    pub fn all() -> [AgentMode; 4] {
        [Self::Normal, Self::DeepResearch, Self::Code, Self::Ops]
    }
}

impl fmt::Display for AgentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "normal" => Ok(Self::Normal),
            "deep_research" | "research" => Ok(Self::DeepResearch),
            "code" => Ok(Self::Code),
            "ops" => Ok(Self::Ops),
            other => Err(format!("unknown agent mode: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_aliases() {
        assert_eq!("deep-research".parse::<AgentMode>().unwrap(), AgentMode::DeepResearch);
        assert_eq!("OPS".parse::<AgentMode>().unwrap(), AgentMode::Ops);
        assert!("turbo".parse::<AgentMode>().is_err());
    }

    #[test]
    fn serde_matches_display() {
        for mode in AgentMode::all() {
            let json = serde_json::to_string(&mode).unwrap();
            assert_eq!(json, format!("\"{mode}\""));
        }
    }
}
