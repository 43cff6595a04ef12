//! Durable state: the cooldown map and the position book, as JSON files in
//! one directory.
//!
//! Every write goes to a temporary sibling first and is renamed into place,
//! so a crash mid-write leaves the previous file intact. Files carry a
//! `schema_version`; versions newer than this build are rejected on load.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use flowgate_core::cooldown::CooldownRegistry;
use flowgate_core::domain::{CycleId, Position, PositionBook};

/// Current schema version for persisted state.
pub const STATE_SCHEMA_VERSION: u32 = 1;

const COOLDOWNS_FILE: &str = "cooldowns.json";
const POSITIONS_FILE: &str = "positions.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed state file '{path}': {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("state file '{path}' has schema version {found} (max supported: {supported})")]
    UnsupportedSchema { path: PathBuf, found: u32, supported: u32 },
}

fn default_schema_version() -> u32 {
    STATE_SCHEMA_VERSION
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CooldownFile {
    #[serde(default = "default_schema_version")]
    schema_version: u32,
    saved_at: DateTime<Utc>,
    cooldowns: BTreeMap<String, DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PositionFile {
    #[serde(default = "default_schema_version")]
    schema_version: u32,
    saved_at: DateTime<Utc>,
    #[serde(default)]
    last_cycle: CycleId,
    positions: Vec<Position>,
}

/// Restored position state.
#[derive(Debug, Clone)]
pub struct RestoredBook {
    pub book: PositionBook,
    pub last_cycle: CycleId,
}

pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn cooldowns_path(&self) -> PathBuf {
        self.dir.join(COOLDOWNS_FILE)
    }

    pub fn positions_path(&self) -> PathBuf {
        self.dir.join(POSITIONS_FILE)
    }

    /// Load cooldowns. A missing file is an empty registry.
    pub fn load_cooldowns(&self, duration: Duration) -> Result<CooldownRegistry, StoreError> {
        let path = self.cooldowns_path();
        match read_versioned::<CooldownFile>(&path, |f| f.schema_version)? {
            Some(file) => {
                debug!(path = %path.display(), entries = file.cooldowns.len(), "cooldowns restored");
                Ok(CooldownRegistry::from_entries(duration, file.cooldowns))
            }
            None => Ok(CooldownRegistry::new(duration)),
        }
    }

    /// Persist cooldowns, dropping entries already expired at `now`.
    pub fn save_cooldowns(&self, registry: &CooldownRegistry, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut compacted = registry.clone();
        compacted.prune_expired(now);
        let file = CooldownFile {
            schema_version: STATE_SCHEMA_VERSION,
            saved_at: now,
            cooldowns: compacted.entries().clone(),
        };
        write_atomic(&self.cooldowns_path(), &file)
    }

    /// Load the position book. A missing file is an empty book.
    pub fn load_positions(&self, capacity: usize) -> Result<RestoredBook, StoreError> {
        let path = self.positions_path();
        match read_versioned::<PositionFile>(&path, |f| f.schema_version)? {
            Some(file) => {
                debug!(path = %path.display(), positions = file.positions.len(), "positions restored");
                Ok(RestoredBook {
                    book: PositionBook::from_positions(capacity, file.positions),
                    last_cycle: file.last_cycle,
                })
            }
            None => Ok(RestoredBook {
                book: PositionBook::new(capacity),
                last_cycle: CycleId::default(),
            }),
        }
    }

    pub fn save_positions(&self, book: &PositionBook, last_cycle: CycleId, now: DateTime<Utc>) -> Result<(), StoreError> {
        let file = PositionFile {
            schema_version: STATE_SCHEMA_VERSION,
            saved_at: now,
            last_cycle,
            positions: book.iter().cloned().collect(),
        };
        write_atomic(&self.positions_path(), &file)
    }
}

fn read_versioned<T: DeserializeOwned>(path: &Path, version: impl Fn(&T) -> u32) -> Result<Option<T>, StoreError> {
    let json = match fs::read_to_string(path) {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let value: T = serde_json::from_str(&json).map_err(|e| StoreError::Malformed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let found = version(&value);
    if found > STATE_SCHEMA_VERSION {
        return Err(StoreError::UnsupportedSchema {
            path: path.to_path_buf(),
            found,
            supported: STATE_SCHEMA_VERSION,
        });
    }
    Ok(Some(value))
}

fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let json = serde_json::to_string_pretty(value).map_err(|e| StoreError::Malformed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let tmp = path.with_extension("json.tmp");
    {
        let mut f = fs::File::create(&tmp).map_err(io_err)?;
        f.write_all(json.as_bytes()).map_err(io_err)?;
        f.sync_all().map_err(io_err)?;
    }
    fs::rename(&tmp, path).map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use flowgate_core::domain::Side;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 15, 0, 0).unwrap()
    }

    #[test]
    fn missing_files_restore_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state"));
        assert!(store.load_cooldowns(Duration::hours(1)).unwrap().is_empty());
        let restored = store.load_positions(16).unwrap();
        assert!(restored.book.is_empty());
        assert_eq!(restored.last_cycle, CycleId(0));
    }

    #[test]
    fn cooldowns_survive_restart_and_expired_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let mut reg = CooldownRegistry::new(Duration::hours(1));
        reg.record("IWM", t0());
        reg.record("OLD", t0() - Duration::hours(3));
        store.save_cooldowns(&reg, t0()).unwrap();

        let restored = store.load_cooldowns(Duration::hours(1)).unwrap();
        assert_eq!(restored.last_displaced("IWM"), Some(t0()));
        assert!(restored.last_displaced("OLD").is_none());
        assert!(restored.is_cooled_down("IWM", t0() + Duration::minutes(59)));
    }

    #[test]
    fn positions_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let mut book = PositionBook::new(4);
        book.open(Position::new("AAPL", Side::Long, 4.8, t0(), 10.0, 190.0)).unwrap();
        store.save_positions(&book, CycleId(12), t0()).unwrap();

        let restored = store.load_positions(4).unwrap();
        assert_eq!(restored.last_cycle, CycleId(12));
        assert_eq!(restored.book.get("AAPL"), book.get("AAPL"));
        assert!(!store.positions_path().with_extension("json.tmp").exists());
    }

    #[test]
    fn future_schema_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        fs::write(
            store.cooldowns_path(),
            r#"{"schema_version": 9, "saved_at": "2024-06-03T15:00:00Z", "cooldowns": {}}"#,
        )
        .unwrap();
        assert!(matches!(
            store.load_cooldowns(Duration::hours(1)),
            Err(StoreError::UnsupportedSchema { found: 9, .. })
        ));
    }

    #[test]
    fn corrupt_file_is_an_error_not_an_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        fs::write(store.positions_path(), "{ truncated").unwrap();
        assert!(matches!(store.load_positions(4), Err(StoreError::Malformed { .. })));
    }
}
