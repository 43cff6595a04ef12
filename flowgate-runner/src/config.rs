//! Application configuration: the engine config plus the runtime and broker
//! settings the runner needs. One TOML file holds all three.
//!
//! ```toml
//! [runtime]
//! interval_secs = 60
//! universe = ["AAPL", "MSFT", "IWM"]
//!
//! [broker]
//! timeout_ms = 5000
//!
//! [engine.gate]
//! default_threshold = 2.7
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use flowgate_core::{ConfigError, EngineConfig};

/// Where feature snapshots come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum SnapshotSource {
    /// Deterministic seeded snapshots for dry runs.
    Synthetic { seed: u64 },
    /// A JSON file rewritten by an external feature pipeline.
    Json { path: PathBuf },
}

impl Default for SnapshotSource {
    fn default() -> Self {
        SnapshotSource::Synthetic { seed: 42 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    pub interval_secs: u64,
    /// Cooldown and position state files live here.
    pub state_dir: PathBuf,
    /// JSONL decision log. Relative paths resolve against `state_dir`.
    pub event_log: PathBuf,
    pub universe: Vec<String>,
    /// Quantity proposed for every new candidate.
    pub order_size: f64,
    /// Fan scoring out over rayon's pool.
    pub parallel_scoring: bool,
    pub snapshots: SnapshotSource,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            state_dir: PathBuf::from("state"),
            event_log: PathBuf::from("events.jsonl"),
            universe: Vec::new(),
            order_size: 10.0,
            parallel_scoring: true,
            snapshots: SnapshotSource::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn event_log_path(&self) -> PathBuf {
        if self.event_log.is_absolute() {
            self.event_log.clone()
        } else {
            self.state_dir.join(&self.event_log)
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_secs == 0 {
            return Err(ConfigError::invalid("runtime.interval_secs", "must be positive"));
        }
        if !(self.order_size.is_finite() && self.order_size > 0.0) {
            return Err(ConfigError::invalid("runtime.order_size", "must be positive"));
        }
        if let Some(bad) = self.universe.iter().find(|s| s.trim().is_empty()) {
            return Err(ConfigError::invalid("runtime.universe", format!("blank symbol {bad:?}")));
        }
        let mut seen = std::collections::BTreeSet::new();
        if let Some(dup) = self.universe.iter().find(|s| !seen.insert(s.as_str())) {
            return Err(ConfigError::invalid("runtime.universe", format!("duplicate symbol {dup}")));
        }
        Ok(())
    }
}

/// Timeout and retry budget applied to every broker call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrokerConfig {
    pub timeout_ms: u64,
    pub max_attempts: u32,
    /// First retry delay; doubles on each further attempt.
    pub backoff_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            max_attempts: 3,
            backoff_ms: 250,
        }
    }
}

impl BrokerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 {
            return Err(ConfigError::invalid("broker.timeout_ms", "must be positive"));
        }
        if self.max_attempts == 0 || self.max_attempts > 10 {
            return Err(ConfigError::invalid("broker.max_attempts", "must lie in [1, 10]"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub runtime: RuntimeConfig,
    pub broker: BrokerConfig,
    pub engine: EngineConfig,
}

impl AppConfig {
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

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.runtime.validate()?;
        self.broker.validate()?;
        self.engine.validate()
    }
}
