//! Versioned weight configuration for the composite scorer.
//!
//! Base weights, neutral defaults, regime multipliers and adaptive multiplier
//! bounds all live here. The table is read-only to the engine; an external
//! tuning process produces new versions which are swapped in between cycles.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::ConfigError;
use crate::domain::Regime;

/// Weight entry for a single feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeatureWeight {
    pub base: f64,
    /// Value substituted when the feature is absent from a snapshot.
    pub neutral: f64,
    /// Regime label → multiplier. Regimes not listed use 1.0.
    #[serde(default)]
    pub regime: BTreeMap<String, f64>,
}

impl FeatureWeight {
    pub fn new(base: f64, neutral: f64) -> Self {
        Self {
            base,
            neutral,
            regime: BTreeMap::new(),
        }
    }

    pub fn with_regime(mut self, regime: Regime, multiplier: f64) -> Self {
        self.regime.insert(regime.as_str().to_string(), multiplier);
        self
    }

    pub fn regime_multiplier(&self, regime: Regime) -> f64 {
        self.regime.get(regime.as_str()).copied().unwrap_or(1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WeightConfig {
    pub version: String,
    pub score_min: f64,
    pub score_max: f64,
    pub features: BTreeMap<String, FeatureWeight>,
    /// Externally supplied adaptive multipliers, clamped to the bounds below.
    pub adaptive: BTreeMap<String, f64>,
    pub adaptive_min: f64,
    pub adaptive_max: f64,
    /// Penalty per unit of toxicity, subtracted from the blend.
    pub toxicity_weight: f64,
    /// Toxicity assumed when the snapshot carries none.
    pub toxicity_neutral: f64,
    /// Data age at which freshness halves.
    pub freshness_half_life_secs: f64,
}

impl Default for WeightConfig {
    fn default() -> Self {
        let mut features = BTreeMap::new();
        features.insert(
            "options_flow".to_string(),
            FeatureWeight::new(2.4, 0.5)
                .with_regime(Regime::RiskOn, 1.1)
                .with_regime(Regime::HighVol, 0.9),
        );
        features.insert(
            "dark_pool".to_string(),
            FeatureWeight::new(1.3, 0.5).with_regime(Regime::RiskOff, 1.15),
        );
        features.insert("insider".to_string(), FeatureWeight::new(0.5, 0.5));
        features.insert(
            "iv_term_skew".to_string(),
            FeatureWeight::new(0.6, 0.5).with_regime(Regime::HighVol, 1.25),
        );
        features.insert("smile_slope".to_string(), FeatureWeight::new(0.35, 0.5));
        features.insert("whale_persistence".to_string(), FeatureWeight::new(0.7, 0.5));
        features.insert("event_alignment".to_string(), FeatureWeight::new(0.4, 0.5));
        features.insert(
            "regime_alignment".to_string(),
            FeatureWeight::new(0.7, 0.5)
                .with_regime(Regime::RiskOn, 1.2)
                .with_regime(Regime::RiskOff, 1.2),
        );
        features.insert("congress".to_string(), FeatureWeight::new(0.5, 0.5));
        features.insert("squeeze".to_string(), FeatureWeight::new(0.6, 0.5));
        features.insert("institutional".to_string(), FeatureWeight::new(0.5, 0.5));
        features.insert("conviction".to_string(), FeatureWeight::new(0.8, 0.5));

        Self {
            version: "default-1".to_string(),
            score_min: 0.0,
            score_max: 8.0,
            features,
            adaptive: BTreeMap::new(),
            adaptive_min: 0.25,
            adaptive_max: 2.5,
            toxicity_weight: 0.9,
            toxicity_neutral: 0.0,
            freshness_half_life_secs: 900.0,
        }
    }
}

impl WeightConfig {
    /// Adaptive multiplier for a feature, clamped to `[adaptive_min, adaptive_max]`.
    ///
    /// A feature with no tuned multiplier (or a non-finite one) uses 1.0,
    /// which is itself clamped so a bound above 1.0 still applies.
    pub fn adaptive_multiplier(&self, feature: &str) -> f64 {
        let raw = self
            .adaptive
            .get(feature)
            .copied()
            .filter(|m| m.is_finite())
            .unwrap_or(1.0);
        raw.clamp(self.adaptive_min, self.adaptive_max)
    }

    /// Effective per-unit weight of a feature in a regime.
    pub fn effective_weight(&self, feature: &str, regime: Regime) -> Option<f64> {
        self.features
            .get(feature)
            .map(|w| w.base * w.regime_multiplier(regime) * self.adaptive_multiplier(feature))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version.trim().is_empty() {
            return Err(ConfigError::invalid("scoring.version", "must not be empty"));
        }
        if !(self.score_min.is_finite() && self.score_max.is_finite()) {
            return Err(ConfigError::invalid("scoring.score_min/score_max", "must be finite"));
        }
        if self.score_min >= self.score_max {
            return Err(ConfigError::invalid(
                "scoring.score_min",
                format!("{} must be below score_max {}", self.score_min, self.score_max),
            ));
        }
        if self.features.is_empty() {
            return Err(ConfigError::invalid("scoring.features", "no features configured"));
        }
        for (name, w) in &self.features {
            let field = format!("scoring.features.{name}");
            if !w.base.is_finite() || !w.neutral.is_finite() {
                return Err(ConfigError::invalid(field, "base and neutral must be finite"));
            }
            for (label, mult) in &w.regime {
                if Regime::parse(label).is_none() {
                    return Err(ConfigError::invalid(
                        format!("{field}.regime"),
                        format!("unknown regime '{label}'"),
                    ));
                }
                if !mult.is_finite() || *mult < 0.0 {
                    return Err(ConfigError::invalid(
                        format!("{field}.regime.{label}"),
                        "multiplier must be finite and non-negative",
                    ));
                }
            }
        }
        if !(self.adaptive_min.is_finite() && self.adaptive_max.is_finite())
            || self.adaptive_min <= 0.0
            || self.adaptive_min > self.adaptive_max
        {
            return Err(ConfigError::invalid(
                "scoring.adaptive_min/adaptive_max",
                "require 0 < adaptive_min <= adaptive_max",
            ));
        }
        if let Some(name) = self.adaptive.keys().find(|k| !self.features.contains_key(*k)) {
            return Err(ConfigError::invalid(
                "scoring.adaptive",
                format!("multiplier for unconfigured feature '{name}'"),
            ));
        }
        if !self.toxicity_weight.is_finite() || self.toxicity_weight < 0.0 {
            return Err(ConfigError::invalid(
                "scoring.toxicity_weight",
                "must be finite and non-negative",
            ));
        }
        if !(0.0..=1.0).contains(&self.toxicity_neutral) {
            return Err(ConfigError::invalid("scoring.toxicity_neutral", "must be in [0, 1]"));
        }
        if !(self.freshness_half_life_secs.is_finite() && self.freshness_half_life_secs > 0.0) {
            return Err(ConfigError::invalid(
                "scoring.freshness_half_life_secs",
                "must be positive",
            ));
        }
        Ok(())
    }
}
