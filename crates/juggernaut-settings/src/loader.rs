//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`JuggernautSettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply `JUGGERNAUT_*` environment overrides (highest priority)
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use juggernaut_core::AgentMode;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{juggernaut_home, JuggernautSettings};

/// Resolve the path to the settings file (`~/.juggernaut/settings.json`).
pub fn settings_path() -> PathBuf {
    juggernaut_home().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<JuggernautSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<JuggernautSettings> {
    let mut settings = load_file_layers(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn load_file_layers(path: &Path) -> Result<JuggernautSettings> {
    let parse_err = |source| SettingsError::Parse {
        path: path.to_owned(),
        source,
    };
    let defaults = serde_json::to_value(JuggernautSettings::default()).map_err(parse_err)?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_owned(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(parse_err)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    serde_json::from_value(merged).map_err(parse_err)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `JUGGERNAUT_*` environment variable overrides to loaded settings.
///
/// Invalid values are ignored with a warning (fall back to file/default).
pub fn apply_env_overrides(settings: &mut JuggernautSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Same as [`apply_env_overrides`] with an injectable variable source.
pub fn apply_overrides<F>(settings: &mut JuggernautSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.u64_in("JUGGERNAUT_PORT", 1, 65535) {
        settings.server.port = v as u16;
    }
    if let Some(v) = env.string("JUGGERNAUT_HOST") {
        settings.server.host = v;
    }

    // ── LLM ─────────────────────────────────────────────────────────
    if let Some(v) = env.string("JUGGERNAUT_MODEL") {
        settings.llm.model = v;
    }
    if let Some(v) = env.string("JUGGERNAUT_FALLBACK_MODELS") {
        settings.llm.fallback_models = parse_list(&v);
    }
    if let Some(v) = env.string("JUGGERNAUT_LLM_BASE_URL") {
        settings.llm.base_url = v;
    }

    // ── Tools / notifications / storage ─────────────────────────────
    if let Some(v) = env.string("JUGGERNAUT_TOOL_EXECUTOR_URL") {
        settings.tools.executor_url = v;
    }
    if let Some(v) = env.string("JUGGERNAUT_WEBHOOK_URL") {
        settings.notifications.webhook_url = Some(v);
    }
    if let Some(v) = env.string("JUGGERNAUT_DB_PATH") {
        settings.storage.db_path = v;
    }

    // ── Agent ───────────────────────────────────────────────────────
    if let Some(v) = env.u64_in("JUGGERNAUT_MAX_ITERATIONS_CEILING", 1, 1000) {
        settings.agent.max_iterations_ceiling = v as u32;
    }
    if let Some(raw) = env.string("JUGGERNAUT_DEFAULT_MODE") {
        match raw.parse::<AgentMode>() {
            Ok(mode) => settings.agent.default_mode = mode,
            Err(_) => warn!(key = "JUGGERNAUT_DEFAULT_MODE", value = %raw, "invalid mode env var, ignoring"),
        }
    }
    if let Some(v) = env.bool("JUGGERNAUT_EVIDENCE_CHECK") {
        settings.agent.evidence_check = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("JUGGERNAUT_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("JUGGERNAUT_LOG_TO_SQLITE") {
        settings.logging.log_to_sqlite = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Split a comma-separated list, dropping blanks.
pub fn parse_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

// ── Env var readers ─────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64_in(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, min, max, "invalid integer env var, ignoring");
        }
        result
    }
}
