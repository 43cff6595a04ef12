//! Entry gate — validates a scored candidate before admission.
//!
//! Checks run in a fixed order: no-signal, hard blocks (toxicity ceiling,
//! freshness floor), the soft score threshold, then any configured technical
//! filters. The first failing check decides the verdict; every verdict has a
//! stable reason code.

pub mod extension;
pub mod resistance;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::ConfigError;
use crate::domain::Candidate;
use crate::scoring::WeightConfig;

pub use extension::PriceExtensionFilter;
pub use resistance::ResistanceFilter;

/// Outcome of a gate evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateVerdict {
    Passed,
    NoSignal,
    ToxicityCeiling,
    FreshnessFloor,
    BelowThreshold,
    PriceExtended,
    NearResistance,
}

impl GateVerdict {
    pub fn is_passed(&self) -> bool {
        matches!(self, Self::Passed)
    }

    /// Stable reason code written to the decision log.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::NoSignal => "no_signal",
            Self::ToxicityCeiling => "toxicity_ceiling",
            Self::FreshnessFloor => "freshness_floor",
            Self::BelowThreshold => "below_threshold",
            Self::PriceExtended => "price_extended",
            Self::NearResistance => "near_resistance",
        }
    }

    /// Hard blocks reject regardless of score.
    pub fn is_hard_block(&self) -> bool {
        matches!(self, Self::ToxicityCeiling | Self::FreshnessFloor)
    }
}

/// Verdict plus the numbers it was decided on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateEvaluation {
    pub symbol: String,
    pub verdict: GateVerdict,
    pub evidence: BTreeMap<String, f64>,
}

impl GateEvaluation {
    pub fn is_eligible(&self) -> bool {
        self.verdict.is_passed()
    }
}

/// Secondary technical check applied after the score threshold.
///
/// Filters see only the candidate; they never reference held positions.
pub trait TechnicalFilter: Send + Sync {
    /// Human-readable name (e.g., "price_extension").
    fn name(&self) -> &str;

    /// Return a blocking verdict, or `None` to let the candidate through.
    /// Numbers compared go into `evidence` either way.
    fn check(&self, candidate: &Candidate, evidence: &mut BTreeMap<String, f64>) -> Option<GateVerdict>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GateConfig {
    /// Score a candidate must exceed when no per-symbol threshold is set.
    pub default_threshold: f64,
    pub symbol_thresholds: BTreeMap<String, f64>,
    pub toxicity_ceiling: f64,
    pub freshness_floor: f64,
    /// Maximum fractional distance from the moving average in the trade
    /// direction. `None` disables the filter.
    pub max_extension_pct: Option<f64>,
    /// Minimum fractional headroom below resistance for long entries.
    /// `None` disables the filter.
    pub resistance_buffer_pct: Option<f64>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            default_threshold: 2.7,
            symbol_thresholds: BTreeMap::new(),
            toxicity_ceiling: 0.90,
            freshness_floor: 0.25,
            max_extension_pct: None,
            resistance_buffer_pct: None,
        }
    }
}

impl GateConfig {
    pub fn threshold_for(&self, symbol: &str) -> f64 {
        self.symbol_thresholds
            .get(symbol)
            .copied()
            .unwrap_or(self.default_threshold)
    }

    pub fn validate(&self, weights: &WeightConfig) -> Result<(), ConfigError> {
        let in_range = |v: f64| v.is_finite() && v >= weights.score_min && v <= weights.score_max;
        if !in_range(self.default_threshold) {
            return Err(ConfigError::invalid(
                "gate.default_threshold",
                format!("must lie in [{}, {}]", weights.score_min, weights.score_max),
            ));
        }
        if let Some((sym, _)) = self.symbol_thresholds.iter().find(|(_, v)| !in_range(**v)) {
            return Err(ConfigError::invalid(
                format!("gate.symbol_thresholds.{sym}"),
                "outside the score range",
            ));
        }
        if !(0.0..=1.0).contains(&self.toxicity_ceiling) {
            return Err(ConfigError::invalid("gate.toxicity_ceiling", "must be in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.freshness_floor) {
            return Err(ConfigError::invalid("gate.freshness_floor", "must be in [0, 1]"));
        }
        for (field, value) in [
            ("gate.max_extension_pct", self.max_extension_pct),
            ("gate.resistance_buffer_pct", self.resistance_buffer_pct),
        ] {
            if let Some(v) = value {
                if !(v.is_finite() && v > 0.0) {
                    return Err(ConfigError::invalid(field, "must be positive"));
                }
            }
        }
        Ok(())
    }
}

/// The entry gate: thresholds plus an ordered list of technical filters.
pub struct EntryGate {
    config: GateConfig,
    filters: Vec<Box<dyn TechnicalFilter>>,
}

impl EntryGate {
    /// Build the gate and whichever technical filters the config enables.
    pub fn from_config(config: &GateConfig) -> Self {
        let mut filters: Vec<Box<dyn TechnicalFilter>> = Vec::new();
        if let Some(max) = config.max_extension_pct {
            filters.push(Box::new(PriceExtensionFilter::new(max)));
        }
        if let Some(buffer) = config.resistance_buffer_pct {
            filters.push(Box::new(ResistanceFilter::new(buffer)));
        }
        Self {
            config: config.clone(),
            filters,
        }
    }

    pub fn with_filter(mut self, filter: Box<dyn TechnicalFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn filter_names(&self) -> Vec<&str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    pub fn evaluate(&self, candidate: &Candidate) -> GateEvaluation {
        let score = &candidate.score;
        let threshold = self.config.threshold_for(&candidate.symbol);

        let mut evidence = BTreeMap::new();
        evidence.insert("score".to_string(), score.score);
        evidence.insert("threshold".to_string(), threshold);
        evidence.insert("toxicity".to_string(), score.toxicity);
        evidence.insert("toxicity_ceiling".to_string(), self.config.toxicity_ceiling);
        evidence.insert("freshness".to_string(), score.freshness);
        evidence.insert("freshness_floor".to_string(), self.config.freshness_floor);

        let verdict = if score.defaulted {
            GateVerdict::NoSignal
        } else if score.toxicity > self.config.toxicity_ceiling {
            GateVerdict::ToxicityCeiling
        } else if score.freshness < self.config.freshness_floor {
            GateVerdict::FreshnessFloor
        } else if score.score <= threshold {
            GateVerdict::BelowThreshold
        } else {
            self.filters
                .iter()
                .find_map(|f| f.check(candidate, &mut evidence))
                .unwrap_or(GateVerdict::Passed)
        };

        tracing::debug!(
            symbol = %candidate.symbol,
            verdict = verdict.code(),
            score = score.score,
            threshold,
            "gate evaluated"
        );

        GateEvaluation {
            symbol: candidate.symbol.clone(),
            verdict,
            evidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FeatureSnapshot, Regime, Side, Technicals, TOXICITY};
    use crate::scoring::{score, CompositeScore};

    fn scored(symbol: &str, value: f64, toxicity: f64, age: f64) -> CompositeScore {
        let weights = WeightConfig::default();
        let mut snap = FeatureSnapshot::new(symbol, age, Regime::Neutral).with(TOXICITY, toxicity);
        for name in weights.features.keys() {
            snap = snap.with(name, value);
        }
        score(&snap, Regime::Neutral, &weights)
    }

    fn candidate(score: CompositeScore) -> Candidate {
        Candidate::new(Side::Long, score, 10.0).with_price(100.0)
    }

    #[test]
    fn strong_fresh_candidate_passes() {
        let gate = EntryGate::from_config(&GateConfig::default());
        let eval = gate.evaluate(&candidate(scored("AAPL", 0.6, 0.1, 0.0)));
        assert_eq!(eval.verdict, GateVerdict::Passed);
        assert!(eval.is_eligible());
    }

    #[test]
    fn toxicity_is_a_hard_block() {
        let gate = EntryGate::from_config(&GateConfig::default());
        let eval = gate.evaluate(&candidate(scored("AAPL", 1.0, 0.95, 0.0)));
        assert_eq!(eval.verdict, GateVerdict::ToxicityCeiling);
        assert!(eval.verdict.is_hard_block());
        assert_eq!(eval.evidence["toxicity"], 0.95);
    }

    #[test]
    fn stale_data_is_a_hard_block() {
        let gate = EntryGate::from_config(&GateConfig::default());
        // two half-lives -> freshness 0.25; three -> 0.125
        let eval = gate.evaluate(&candidate(scored("AAPL", 1.0, 0.0, 2700.0)));
        assert_eq!(eval.verdict, GateVerdict::FreshnessFloor);
    }

    #[test]
    fn below_threshold() {
        let gate = EntryGate::from_config(&GateConfig::default());
        let eval = gate.evaluate(&candidate(scored("AAPL", 0.2, 0.0, 0.0)));
        assert_eq!(eval.verdict, GateVerdict::BelowThreshold);
        assert_eq!(eval.verdict.code(), "below_threshold");
    }

    #[test]
    fn per_symbol_threshold_overrides_default() {
        let mut config = GateConfig::default();
        config.symbol_thresholds.insert("AAPL".into(), 6.0);
        let gate = EntryGate::from_config(&config);
        // 0.6 * 9.35 = 5.61 passes the default 2.7 but not 6.0
        assert_eq!(
            gate.evaluate(&candidate(scored("AAPL", 0.6, 0.0, 0.0))).verdict,
            GateVerdict::BelowThreshold
        );
        assert_eq!(
            gate.evaluate(&candidate(scored("MSFT", 0.6, 0.0, 0.0))).verdict,
            GateVerdict::Passed
        );
    }

    #[test]
    fn absent_snapshot_is_no_signal() {
        let gate = EntryGate::from_config(&GateConfig::default());
        let neutral = CompositeScore::neutral("AAPL", &WeightConfig::default());
        assert_eq!(gate.evaluate(&candidate(neutral)).verdict, GateVerdict::NoSignal);
    }

    #[test]
    fn technical_filters_run_after_threshold() {
        let config = GateConfig {
            max_extension_pct: Some(0.05),
            ..GateConfig::default()
        };
        let gate = EntryGate::from_config(&config);
        assert_eq!(gate.filter_names(), vec!["price_extension"]);

        let extended = candidate(scored("AAPL", 0.6, 0.0, 0.0)).with_technicals(Technicals {
            moving_average: Some(90.0),
            resistance: None,
        });
        let eval = gate.evaluate(&extended);
        assert_eq!(eval.verdict, GateVerdict::PriceExtended);
        assert!(eval.evidence.contains_key("extension_pct"));

        // a weak candidate reports the threshold, not the filter
        let weak = candidate(scored("AAPL", 0.2, 0.0, 0.0)).with_technicals(Technicals {
            moving_average: Some(90.0),
            resistance: None,
        });
        assert_eq!(gate.evaluate(&weak).verdict, GateVerdict::BelowThreshold);
    }

    struct PriceCeiling(f64);

    impl TechnicalFilter for PriceCeiling {
        fn name(&self) -> &str {
            "price_ceiling"
        }

        fn check(&self, candidate: &Candidate, evidence: &mut BTreeMap<String, f64>) -> Option<GateVerdict> {
            let price = candidate.price?;
            evidence.insert("price_ceiling".to_string(), self.0);
            (price > self.0).then_some(GateVerdict::PriceExtended)
        }
    }

    #[test]
    fn added_filters_run_after_configured_ones() {
        let config = GateConfig {
            resistance_buffer_pct: Some(0.01),
            ..GateConfig::default()
        };
        let gate = EntryGate::from_config(&config).with_filter(Box::new(PriceCeiling(50.0)));
        assert_eq!(gate.filter_names(), vec!["resistance", "price_ceiling"]);

        let eval = gate.evaluate(&candidate(scored("AAPL", 0.6, 0.0, 0.0)));
        assert_eq!(eval.verdict, GateVerdict::PriceExtended);
        assert_eq!(eval.evidence["price_ceiling"], 50.0);

        let cheap = Candidate::new(Side::Long, scored("F", 0.6, 0.0, 0.0), 10.0).with_price(12.0);
        assert_eq!(gate.evaluate(&cheap).verdict, GateVerdict::Passed);
    }

    #[test]
    fn unreadable_data_age_is_a_hard_block() {
        let gate = EntryGate::from_config(&GateConfig::default());
        let eval = gate.evaluate(&candidate(scored("AAPL", 1.0, 0.0, f64::NAN)));
        assert_eq!(eval.verdict, GateVerdict::FreshnessFloor);
        assert_eq!(eval.evidence["freshness"], 0.0);
    }

    #[test]
    fn reason_codes_are_distinct() {
        let all = [
            GateVerdict::Passed,
            GateVerdict::NoSignal,
            GateVerdict::ToxicityCeiling,
            GateVerdict::FreshnessFloor,
            GateVerdict::BelowThreshold,
            GateVerdict::PriceExtended,
            GateVerdict::NearResistance,
        ];
        let codes: std::collections::BTreeSet<_> = all.iter().map(|v| v.code()).collect();
        assert_eq!(codes.len(), all.len());
    }

    #[test]
    fn config_threshold_outside_range_rejected() {
        let config = GateConfig {
            default_threshold: 12.0,
            ..GateConfig::default()
        };
        assert!(config.validate(&WeightConfig::default()).is_err());
    }
}
