//! Engine configuration — one explicit, versioned object handed to the
//! scorer, gate, controller and exit evaluator.
//!
//! Parsed from TOML. A configuration that fails to parse or validate is a
//! fatal error: the caller must not run a cycle with it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::admission::AdmissionConfig;
use crate::cooldown::CooldownConfig;
use crate::domain::ConfigFingerprint;
use crate::exit::ExitConfig;
use crate::gate::GateConfig;
use crate::scoring::WeightConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config: {0}")]
    Parse(String),

    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Complete decision-engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub scoring: WeightConfig,
    pub gate: GateConfig,
    pub admission: AdmissionConfig,
    pub cooldown: CooldownConfig,
    pub exit: ExitConfig,
}

impl EngineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scoring.validate()?;
        self.gate.validate(&self.scoring)?;
        self.admission.validate()?;
        self.cooldown.validate()?;
        self.exit.validate()?;
        Ok(())
    }

    /// Exact identity of this configuration.
    ///
    /// serde_json over BTreeMaps yields a canonical key order, so equal
    /// configs always hash equal.
    pub fn fingerprint(&self) -> ConfigFingerprint {
        let json = serde_json::to_string(self).unwrap_or_default();
        ConfigFingerprint::from_bytes(json.as_bytes())
    }

    /// Weight-table version label.
    pub fn version(&self) -> &str {
        &self.scoring.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn empty_toml_yields_defaults() {
        let config = EngineConfig::from_toml("").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn toml_roundtrip_preserves_fingerprint() {
        let config = EngineConfig::default();
        let text = config.to_toml().unwrap();
        let back = EngineConfig::from_toml(&text).unwrap();
        assert_eq!(config.fingerprint(), back.fingerprint());
    }

    #[test]
    fn partial_override() {
        let config = EngineConfig::from_toml(
            r#"
[admission]
max_positions = 8
hard_cap = 8

[gate]
default_threshold = 3.1
"#,
        )
        .unwrap();
        assert_eq!(config.admission.max_positions, 8);
        assert_eq!(config.gate.default_threshold, 3.1);
        assert_eq!(config.scoring, WeightConfig::default());
    }

    #[test]
    fn unknown_field_is_fatal() {
        let err = EngineConfig::from_toml("[gate]\ndefault_treshold = 3.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn malformed_weight_table_is_fatal() {
        let err = EngineConfig::from_toml(
            r#"
[scoring.features.options_flow]
base = "heavy"
neutral = 0.5
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn invalid_value_is_fatal() {
        let err = EngineConfig::from_toml("[scoring]\nfreshness_half_life_secs = 0.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn fingerprint_changes_with_weights() {
        let a = EngineConfig::default();
        let mut b = a.clone();
        b.scoring.adaptive.insert("options_flow".into(), 1.3);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
