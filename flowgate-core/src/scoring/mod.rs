//! Composite scorer — turns a feature snapshot into one bounded score.
//!
//! Per feature: `value × base × regime multiplier × adaptive multiplier`,
//! with the neutral default standing in for absent values. The blend is
//! reduced by a toxicity penalty, scaled by an exponential freshness factor,
//! and clamped to `[score_min, score_max]`.
//!
//! Scoring is a pure function of (snapshot, regime, weight table). A missing
//! snapshot is not an error: it yields a fully-defaulted neutral score flagged
//! as `defaulted`, which downstream consumers read as "no signal".

pub mod weights;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::{FeatureSnapshot, Regime, TOXICITY};

pub use weights::{FeatureWeight, WeightConfig};

/// Result of scoring one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeScore {
    pub symbol: String,
    /// Final score, clamped to the configured range.
    pub score: f64,
    /// Weighted contribution of every configured feature.
    pub components: BTreeMap<String, f64>,
    /// Features that were absent and replaced by their neutral default.
    pub defaulted_features: Vec<String>,
    /// Sum of contributions minus the toxicity penalty, before freshness.
    pub raw: f64,
    pub toxicity: f64,
    pub toxicity_penalty: f64,
    /// Freshness multiplier in [0, 1].
    pub freshness: f64,
    pub regime: Regime,
    /// True when no snapshot was available at all.
    pub defaulted: bool,
    pub weights_version: String,
}

impl CompositeScore {
    /// Neutral, fully-defaulted score for a symbol without a snapshot.
    pub fn neutral(symbol: &str, weights: &WeightConfig) -> Self {
        let regime = Regime::Neutral;
        let components: BTreeMap<String, f64> = weights
            .features
            .iter()
            .map(|(name, w)| (name.clone(), contribution(weights, name, w, w.neutral, regime)))
            .collect();
        let toxicity = weights.toxicity_neutral;
        let toxicity_penalty = weights.toxicity_weight * toxicity;
        let raw = components.values().sum::<f64>() - toxicity_penalty;

        Self {
            symbol: symbol.to_string(),
            score: clamp_score(raw, weights),
            defaulted_features: weights.features.keys().cloned().collect(),
            components,
            raw,
            toxicity,
            toxicity_penalty,
            freshness: 1.0,
            regime,
            defaulted: true,
            weights_version: weights.version.clone(),
        }
    }

    /// Numeric evidence for decision logs.
    pub fn evidence(&self) -> BTreeMap<String, f64> {
        let mut e = BTreeMap::new();
        e.insert("score".to_string(), self.score);
        e.insert("raw".to_string(), self.raw);
        e.insert("freshness".to_string(), self.freshness);
        e.insert("toxicity".to_string(), self.toxicity);
        e
    }
}

/// Score a snapshot under an explicit regime.
pub fn score(snapshot: &FeatureSnapshot, regime: Regime, weights: &WeightConfig) -> CompositeScore {
    let mut components = BTreeMap::new();
    let mut defaulted_features = Vec::new();

    for (name, w) in &weights.features {
        let value = match snapshot.get(name) {
            Some(v) => v,
            None => {
                defaulted_features.push(name.clone());
                w.neutral
            }
        };
        components.insert(name.clone(), contribution(weights, name, w, value, regime));
    }

    let toxicity = snapshot
        .get(TOXICITY)
        .map(|t| t.clamp(0.0, 1.0))
        .unwrap_or(weights.toxicity_neutral);
    let toxicity_penalty = weights.toxicity_weight * toxicity;
    let raw = components.values().sum::<f64>() - toxicity_penalty;
    let freshness = freshness_factor(snapshot.data_age_secs, weights.freshness_half_life_secs);

    CompositeScore {
        symbol: snapshot.symbol.clone(),
        score: clamp_score(raw * freshness, weights),
        components,
        defaulted_features,
        raw,
        toxicity,
        toxicity_penalty,
        freshness,
        regime,
        defaulted: false,
        weights_version: weights.version.clone(),
    }
}

/// Score whatever the provider returned, using the snapshot's own regime label.
pub fn score_or_neutral(
    symbol: &str,
    snapshot: Option<&FeatureSnapshot>,
    weights: &WeightConfig,
) -> CompositeScore {
    match snapshot {
        Some(snap) => score(snap, snap.regime(), weights),
        None => CompositeScore::neutral(symbol, weights),
    }
}

/// `0.5^(age / half_life)`. Non-positive ages count as fresh; an infinite or
/// unreadable (NaN) age is fully stale.
pub fn freshness_factor(age_secs: f64, half_life_secs: f64) -> f64 {
    if age_secs.is_nan() {
        return 0.0;
    }
    if age_secs <= 0.0 {
        return 1.0;
    }
    if !half_life_secs.is_finite() || half_life_secs <= 0.0 {
        return 0.0;
    }
    0.5_f64.powf(age_secs / half_life_secs).clamp(0.0, 1.0)
}

fn contribution(weights: &WeightConfig, name: &str, w: &FeatureWeight, value: f64, regime: Regime) -> f64 {
    value * w.base * w.regime_multiplier(regime) * weights.adaptive_multiplier(name)
}

fn clamp_score(value: f64, weights: &WeightConfig) -> f64 {
    if value.is_nan() {
        return weights.score_min;
    }
    value.clamp(weights.score_min, weights.score_max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_snapshot(symbol: &str, value: f64) -> FeatureSnapshot {
        let weights = WeightConfig::default();
        let mut snap = FeatureSnapshot::new(symbol, 0.0, Regime::Neutral);
        for name in weights.features.keys() {
            snap = snap.with(name, value);
        }
        snap
    }

    #[test]
    fn missing_feature_uses_neutral_not_zero() {
        let weights = WeightConfig::default();
        let with_missing = full_snapshot("TSLA", 0.6).with_missing("conviction");
        let as_zero = full_snapshot("TSLA", 0.6).with("conviction", 0.0);

        let s_missing = score(&with_missing, Regime::Neutral, &weights);
        let s_zero = score(&as_zero, Regime::Neutral, &weights);

        assert_eq!(s_missing.defaulted_features, vec!["conviction".to_string()]);
        assert!((s_missing.components["conviction"] - 0.4).abs() < 1e-12);
        let delta = s_missing.score - s_zero.score;
        assert!((delta - 0.5 * 0.8).abs() < 1e-9, "delta = {delta}");
    }

    #[test]
    fn scoring_is_deterministic() {
        let weights = WeightConfig::default();
        let snap = full_snapshot("SPY", 0.73).with(TOXICITY, 0.2);
        assert_eq!(
            score(&snap, Regime::RiskOn, &weights),
            score(&snap, Regime::RiskOn, &weights)
        );
    }

    #[test]
    fn toxicity_penalises() {
        let weights = WeightConfig::default();
        let clean = score(&full_snapshot("SPY", 0.6), Regime::Neutral, &weights);
        let toxic = score(&full_snapshot("SPY", 0.6).with(TOXICITY, 1.0), Regime::Neutral, &weights);
        assert!((clean.score - toxic.score - 0.9).abs() < 1e-9);
        assert_eq!(toxic.toxicity, 1.0);
    }

    #[test]
    fn toxicity_is_clamped_to_unit_range() {
        let weights = WeightConfig::default();
        let s = score(&full_snapshot("SPY", 0.6).with(TOXICITY, 3.0), Regime::Neutral, &weights);
        assert_eq!(s.toxicity, 1.0);
    }

    #[test]
    fn freshness_halves_at_half_life() {
        assert_eq!(freshness_factor(0.0, 900.0), 1.0);
        assert_eq!(freshness_factor(-5.0, 900.0), 1.0);
        assert!((freshness_factor(900.0, 900.0) - 0.5).abs() < 1e-12);
        assert!((freshness_factor(1800.0, 900.0) - 0.25).abs() < 1e-12);
        assert_eq!(freshness_factor(f64::INFINITY, 900.0), 0.0);
    }

    #[test]
    fn unreadable_age_is_fully_stale() {
        assert_eq!(freshness_factor(f64::NAN, 900.0), 0.0);
        let mut snap = full_snapshot("SPY", 0.5);
        snap.data_age_secs = f64::NAN;
        let s = score(&snap, Regime::Neutral, &WeightConfig::default());
        assert_eq!(s.freshness, 0.0);
        assert_eq!(s.score, 0.0);
    }

    #[test]
    fn stale_data_scales_score() {
        let weights = WeightConfig::default();
        let fresh = score(&full_snapshot("SPY", 0.5), Regime::Neutral, &weights);
        let mut stale_snap = full_snapshot("SPY", 0.5);
        stale_snap.data_age_secs = 900.0;
        let stale = score(&stale_snap, Regime::Neutral, &weights);
        assert!((stale.score - fresh.score * 0.5).abs() < 1e-9);
        assert_eq!(stale.raw, fresh.raw);
    }

    #[test]
    fn score_is_clamped_high() {
        let mut weights = WeightConfig::default();
        for name in weights.features.keys().cloned().collect::<Vec<_>>() {
            weights.adaptive.insert(name, 100.0);
        }
        let s = score(&full_snapshot("NVDA", 1.0), Regime::RiskOn, &weights);
        assert_eq!(s.score, weights.score_max);
        assert!(s.raw > weights.score_max);
    }

    #[test]
    fn score_is_clamped_low() {
        let weights = WeightConfig::default();
        let s = score(&full_snapshot("NVDA", -5.0), Regime::Neutral, &weights);
        assert_eq!(s.score, weights.score_min);
    }

    #[test]
    fn absent_snapshot_is_neutral_and_flagged() {
        let weights = WeightConfig::default();
        let s = score_or_neutral("GME", None, &weights);
        assert!(s.defaulted);
        assert_eq!(s.symbol, "GME");
        assert_eq!(s.freshness, 1.0);
        assert_eq!(s.defaulted_features.len(), weights.features.len());

        let all_neutral = score(&full_snapshot("GME", 0.5), Regime::Neutral, &weights);
        assert!((s.score - all_neutral.score).abs() < 1e-12);
    }

    #[test]
    fn regime_label_is_taken_from_snapshot() {
        let weights = WeightConfig::default();
        let mut snap = full_snapshot("SPY", 0.8);
        snap.regime = "risk_on".into();
        let s = score_or_neutral("SPY", Some(&snap), &weights);
        assert_eq!(s.regime, Regime::RiskOn);
        assert!(!s.defaulted);
    }
}
