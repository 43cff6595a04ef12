//! Feature snapshot providers and the best-effort wrapper the cycle uses.
//!
//! Providers may fail; the cycle never sees those failures. `BestEffortProvider`
//! turns every error into an absent snapshot (logged), which the scorer in turn
//! maps to a neutral "no signal" score.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use flowgate_core::domain::{FeatureSnapshot, Regime, FLOW_BIAS, MOVING_AVERAGE, RESISTANCE, TOXICITY};
use flowgate_core::scoring::WeightConfig;

use crate::config::SnapshotSource;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("cannot read snapshot file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed snapshot data: {0}")]
    Malformed(String),

    #[error("unsupported snapshot schema version {found} (max supported: {supported})")]
    UnsupportedSchema { found: u32, supported: u32 },

    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

/// Source of per-symbol feature snapshots.
pub trait FeatureProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Called once at the start of every cycle, before any `snapshot` call.
    fn prepare(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    /// `Ok(None)` means the provider has nothing for this symbol.
    fn snapshot(&self, symbol: &str) -> Result<Option<FeatureSnapshot>, ProviderError>;
}

/// Build the provider named by the runtime config.
pub fn provider_for(source: &SnapshotSource) -> Box<dyn FeatureProvider> {
    match source {
        SnapshotSource::Synthetic { seed } => Box::new(SyntheticProvider::new(*seed)),
        SnapshotSource::Json { path } => Box::new(JsonSnapshotProvider::new(path.clone())),
    }
}

/// Swallows provider errors: every failure becomes an absent snapshot.
pub struct BestEffortProvider {
    inner: Box<dyn FeatureProvider>,
}

impl BestEffortProvider {
    pub fn new(inner: Box<dyn FeatureProvider>) -> Self {
        Self { inner }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Returns false when the refresh failed; stale or empty data is then served.
    pub fn prepare(&self) -> bool {
        match self.inner.prepare() {
            Ok(()) => true,
            Err(e) => {
                warn!(provider = self.inner.name(), error = %e, "provider refresh failed");
                false
            }
        }
    }

    pub fn get_snapshot(&self, symbol: &str) -> Option<FeatureSnapshot> {
        match self.inner.snapshot(symbol) {
            Ok(Some(snap)) if snap.symbol == symbol => Some(snap),
            Ok(Some(snap)) => {
                warn!(
                    provider = self.inner.name(),
                    requested = symbol,
                    returned = %snap.symbol,
                    "provider returned a snapshot for the wrong symbol; discarded"
                );
                None
            }
            Ok(None) => {
                debug!(provider = self.inner.name(), symbol, "no snapshot");
                None
            }
            Err(e) => {
                warn!(provider = self.inner.name(), symbol, error = %e, "snapshot fetch failed");
                None
            }
        }
    }
}

// ─── JSON file provider ─────────────────────────────────────────────

/// Current schema version of snapshot files.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    SNAPSHOT_SCHEMA_VERSION
}

/// On-disk layout of a snapshot file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotFile {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub snapshots: Vec<FeatureSnapshot>,
}

impl SnapshotFile {
    pub fn parse(json: &str) -> Result<Self, ProviderError> {
        let file: SnapshotFile = serde_json::from_str(json).map_err(|e| ProviderError::Malformed(e.to_string()))?;
        if file.schema_version > SNAPSHOT_SCHEMA_VERSION {
            return Err(ProviderError::UnsupportedSchema {
                found: file.schema_version,
                supported: SNAPSHOT_SCHEMA_VERSION,
            });
        }
        Ok(file)
    }
}

/// Reads a snapshot file written by an external pipeline. The file is
/// re-read on every `prepare`; a failed read clears the cache so stale data
/// is never scored as fresh.
pub struct JsonSnapshotProvider {
    path: PathBuf,
    cache: RwLock<BTreeMap<String, FeatureSnapshot>>,
}

impl JsonSnapshotProvider {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            cache: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, FeatureSnapshot>, ProviderError> {
        let json = std::fs::read_to_string(&self.path).map_err(|source| ProviderError::Io {
            path: self.path.clone(),
            source,
        })?;
        let file = SnapshotFile::parse(&json)?;
        Ok(file
            .snapshots
            .into_iter()
            .map(|s| (s.symbol.clone(), s))
            .collect())
    }
}

impl FeatureProvider for JsonSnapshotProvider {
    fn name(&self) -> &str {
        "json"
    }

    fn prepare(&self) -> Result<(), ProviderError> {
        let loaded = self.load();
        let mut cache = self
            .cache
            .write()
            .map_err(|_| ProviderError::Unavailable("snapshot cache poisoned".into()))?;
        match loaded {
            Ok(map) => {
                debug!(path = %self.path.display(), symbols = map.len(), "snapshot file loaded");
                *cache = map;
                Ok(())
            }
            Err(e) => {
                cache.clear();
                Err(e)
            }
        }
    }

    fn snapshot(&self, symbol: &str) -> Result<Option<FeatureSnapshot>, ProviderError> {
        let cache = self
            .cache
            .read()
            .map_err(|_| ProviderError::Unavailable("snapshot cache poisoned".into()))?;
        Ok(cache.get(symbol).cloned())
    }
}

// ─── Synthetic provider ─────────────────────────────────────────────

/// Deterministic pseudo-random snapshots for dry runs and demos.
///
/// Each (seed, cycle, symbol) triple maps to a BLAKE3-derived RNG seed, so
/// output does not depend on the order symbols are requested in.
pub struct SyntheticProvider {
    seed: u64,
    cycle: AtomicU64,
    features: Vec<String>,
    missing_rate: f64,
    absent_rate: f64,
}

impl SyntheticProvider {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            cycle: AtomicU64::new(0),
            features: WeightConfig::default().features.keys().cloned().collect(),
            missing_rate: 0.08,
            absent_rate: 0.02,
        }
    }

    /// Override the per-feature and per-snapshot dropout rates.
    pub fn with_dropout(mut self, missing_rate: f64, absent_rate: f64) -> Self {
        self.missing_rate = missing_rate.clamp(0.0, 1.0);
        self.absent_rate = absent_rate.clamp(0.0, 1.0);
        self
    }

    pub fn cycle(&self) -> u64 {
        self.cycle.load(Ordering::SeqCst)
    }

    fn sub_seed(&self, cycle: u64, symbol: &str) -> u64 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.seed.to_le_bytes());
        hasher.update(&cycle.to_le_bytes());
        hasher.update(symbol.as_bytes());
        let hash = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&hash.as_bytes()[..8]);
        u64::from_le_bytes(bytes)
    }

    /// Regime shared by every symbol within one cycle.
    fn regime_for(&self, cycle: u64) -> Regime {
        let mut rng = StdRng::seed_from_u64(self.sub_seed(cycle, "__regime__"));
        Regime::ALL[rng.gen_range(0..Regime::ALL.len())]
    }

    /// Stable per-symbol price level in [20, 520).
    fn base_price(&self, symbol: &str) -> f64 {
        let h = self.sub_seed(0, symbol);
        20.0 + (h % 50_000) as f64 / 100.0
    }

    pub fn generate(&self, cycle: u64, symbol: &str) -> Option<FeatureSnapshot> {
        let mut rng = StdRng::seed_from_u64(self.sub_seed(cycle, symbol));
        if rng.gen_bool(self.absent_rate) {
            return None;
        }

        let age = rng.gen_range(0.0..600.0);
        let mut snap = FeatureSnapshot::new(symbol, age, self.regime_for(cycle));
        for name in &self.features {
            snap = if rng.gen_bool(self.missing_rate) {
                snap.with_missing(name)
            } else {
                snap.with(name, rng.gen::<f64>())
            };
        }

        let price = self.base_price(symbol) * (1.0 + rng.gen_range(-0.03..0.03));
        Some(
            snap.with(TOXICITY, rng.gen_range(0.0..0.6))
                .with(FLOW_BIAS, rng.gen_range(-1.0..1.0))
                .with(MOVING_AVERAGE, price * (1.0 + rng.gen_range(-0.05..0.05)))
                .with(RESISTANCE, price * (1.0 + rng.gen_range(0.0..0.08)))
                .with_price(price),
        )
    }
}

impl FeatureProvider for SyntheticProvider {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn prepare(&self) -> Result<(), ProviderError> {
        self.cycle.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn snapshot(&self, symbol: &str) -> Result<Option<FeatureSnapshot>, ProviderError> {
        Ok(self.generate(self.cycle(), symbol))
    }
}
