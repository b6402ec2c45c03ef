//! # juggernaut-settings
//!
//! Layered configuration for the Juggernaut agent loop.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`JuggernautSettings::default()`]
//! 2. **User file**: `~/.juggernaut/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `JUGGERNAUT_*` overrides (highest priority)
//!
//! Settings are loaded once at process start and passed down explicitly.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
