//! Cooldown registry — symbol → last-displaced timestamp with TTL semantics.
//!
//! A symbol is cooled down while `now - last_displaced_at < duration`.
//! Expiry is a read-time range check; entries are never required to be
//! deleted, though `prune_expired` compacts the map before persistence.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::ConfigError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CooldownConfig {
    pub duration_secs: u64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            duration_secs: 60 * 60,
        }
    }
}

impl CooldownConfig {
    pub fn duration(&self) -> Duration {
        Duration::seconds(self.duration_secs as i64)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        // a week is far beyond any sane anti-thrash window
        if self.duration_secs > 7 * 24 * 3600 {
            return Err(ConfigError::invalid("cooldown.duration_secs", "must not exceed one week"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CooldownRegistry {
    duration: Duration,
    entries: BTreeMap<String, DateTime<Utc>>,
}

impl CooldownRegistry {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            entries: BTreeMap::new(),
        }
    }

    /// Restore from a persisted symbol → timestamp map.
    pub fn from_entries(duration: Duration, entries: BTreeMap<String, DateTime<Utc>>) -> Self {
        Self { duration, entries }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn set_duration(&mut self, duration: Duration) {
        self.duration = duration;
    }

    pub fn is_cooled_down(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        self.entries
            .get(symbol)
            .is_some_and(|at| now.signed_duration_since(*at) < self.duration)
    }

    /// Record a displacement. Later timestamps overwrite earlier ones.
    pub fn record(&mut self, symbol: &str, now: DateTime<Utc>) {
        self.entries.insert(symbol.to_string(), now);
    }

    pub fn last_displaced(&self, symbol: &str) -> Option<DateTime<Utc>> {
        self.entries.get(symbol).copied()
    }

    /// Remaining cooldown (zero if not cooled down).
    pub fn remaining(&self, symbol: &str, now: DateTime<Utc>) -> Duration {
        match self.entries.get(symbol) {
            Some(at) => {
                let left = self.duration - now.signed_duration_since(*at);
                if left > Duration::zero() {
                    left
                } else {
                    Duration::zero()
                }
            }
            None => Duration::zero(),
        }
    }

    /// Symbols still under cooldown at `now`.
    pub fn active(&self, now: DateTime<Utc>) -> impl Iterator<Item = (&str, DateTime<Utc>)> + '_ {
        self.entries
            .iter()
            .filter(move |(_, at)| now.signed_duration_since(**at) < self.duration)
            .map(|(s, at)| (s.as_str(), *at))
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn prune_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        let duration = self.duration;
        self.entries
            .retain(|_, at| now.signed_duration_since(*at) < duration);
        before - self.entries.len()
    }

    pub fn entries(&self) -> &BTreeMap<String, DateTime<Utc>> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
