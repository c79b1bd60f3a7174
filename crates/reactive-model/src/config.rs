//! `ModelOptions`: the handful of knobs spec §6 documents as "constructor
//! options" (validation timeout, fail-fast mode, reaction debounce), loadable
//! from TOML or JSON.
//!
//! Shaped after `policy_config.rs`'s `PolicyConfig`: a small `#[serde(default)]`
//! struct with `from_toml_str`/`from_json_str` constructors rather than a
//! bespoke parser, so the defaults baked into the type are also the defaults
//! a missing config file would produce.

use std::rc::Rc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ErrorRecord;
use crate::validation::PipelineConfig;

fn default_async_validation_timeout_ms() -> u64 {
    5000
}

fn default_reaction_debounce_ms() -> u64 {
    0
}

/// Construction-time options for a [`crate::model::ModelCoordinator`].
///
/// Field names serialize as camelCase to match spec §6's option names
/// (`asyncValidationTimeout`, `failFast`, `debounceReactions`).
#[derive(Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ModelOptions {
    /// Per-async-validator timeout, in milliseconds (spec §6: `asyncValidationTimeout`).
    pub async_validation_timeout_ms: u64,
    /// Fail-fast vs aggregate mode for `validate_field`/`validate_all` (spec §6: `failFast`).
    pub fail_fast: bool,
    /// Debounce window applied to every reaction dispatch, in milliseconds
    /// (spec §6: `debounceReactions`). Zero (the default) dispatches synchronously.
    pub reaction_debounce_ms: u64,
    /// Formats an [`ErrorRecord`] for `ModelCoordinator::get_validation_summary`
    /// (spec §6: `errorFormatter`). `None` uses the default `"<field>: <message>"`
    /// rendering. Not serializable, so config files can't set it; construct
    /// an options value in code and assign it directly instead.
    #[serde(skip)]
    pub error_formatter: Option<Rc<dyn Fn(&ErrorRecord) -> String>>,
}

impl std::fmt::Debug for ModelOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelOptions")
            .field("async_validation_timeout_ms", &self.async_validation_timeout_ms)
            .field("fail_fast", &self.fail_fast)
            .field("reaction_debounce_ms", &self.reaction_debounce_ms)
            .field("has_error_formatter", &self.error_formatter.is_some())
            .finish()
    }
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            async_validation_timeout_ms: default_async_validation_timeout_ms(),
            fail_fast: false,
            reaction_debounce_ms: default_reaction_debounce_ms(),
            error_formatter: None,
        }
    }
}

/// Errors loading or parsing a [`ModelOptions`] document.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[cfg(feature = "config-toml")]
    #[error("failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("failed to parse JSON config: {0}")]
    Json(#[from] serde_json::Error),
}

impl ModelOptions {
    #[cfg(feature = "config-toml")]
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    #[cfg(feature = "config-toml")]
    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let raw = std::fs::read_to_string(path_ref).map_err(|source| ConfigError::Io {
            path: path_ref.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_json_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let raw = std::fs::read_to_string(path_ref).map_err(|source| ConfigError::Io {
            path: path_ref.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            timeout: Duration::from_millis(self.async_validation_timeout_ms),
            fail_fast: self.fail_fast,
        }
    }

    pub fn reaction_debounce(&self) -> Duration {
        Duration::from_millis(self.reaction_debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let opts = ModelOptions::default();
        assert_eq!(opts.async_validation_timeout_ms, 5000);
        assert_eq!(opts.reaction_debounce_ms, 0, "reactions run synchronously by default");
        assert!(!opts.fail_fast);
        assert!(opts.error_formatter.is_none());
    }

    #[test]
    fn json_overrides_partial_fields() {
        let opts = ModelOptions::from_json_str(r#"{"failFast": true}"#).unwrap();
        assert!(opts.fail_fast);
        assert_eq!(opts.reaction_debounce_ms, 0);
    }

    #[cfg(feature = "config-toml")]
    #[test]
    fn toml_round_trips_custom_debounce() {
        let opts = ModelOptions::from_toml_str("reactionDebounceMs = 50\n").unwrap();
        assert_eq!(opts.reaction_debounce_ms, 50);
        assert_eq!(opts.async_validation_timeout_ms, 5000);
    }
}
