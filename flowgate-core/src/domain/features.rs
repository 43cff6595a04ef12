//! Feature snapshots — the per-symbol input vector handed to the scorer.
//!
//! A snapshot is produced fresh every cycle by an external provider and is
//! immutable once handed over. Individual features may be absent; absence is
//! represented explicitly as `None` and resolved to a neutral default inside
//! the scorer, never downstream.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::candidate::Technicals;

/// Feature key carrying the adverse-selection estimate (0.0 to 1.0).
pub const TOXICITY: &str = "toxicity";

/// Feature key carrying directional flow bias (-1.0 bearish to +1.0 bullish).
pub const FLOW_BIAS: &str = "flow_bias";

/// Unweighted technical context carried alongside the scored features.
pub const MOVING_AVERAGE: &str = "moving_average";
pub const RESISTANCE: &str = "resistance";

/// Market regime label used to condition feature weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    RiskOn,
    Neutral,
    RiskOff,
    HighVol,
}

impl Regime {
    pub const ALL: [Regime; 4] = [
        Regime::RiskOn,
        Regime::Neutral,
        Regime::RiskOff,
        Regime::HighVol,
    ];

    /// Parse a provider label. Unknown labels map to `Neutral`.
    pub fn from_label(label: &str) -> Self {
        Self::parse(label).unwrap_or(Regime::Neutral)
    }

    /// Strict parse, used by config validation.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "risk_on" | "bull" | "bullish" => Some(Regime::RiskOn),
            "neutral" | "mixed" => Some(Regime::Neutral),
            "risk_off" | "bear" | "bearish" => Some(Regime::RiskOff),
            "high_vol" | "volatile" => Some(Regime::HighVol),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Regime::RiskOn => "risk_on",
            Regime::Neutral => "neutral",
            Regime::RiskOff => "risk_off",
            Regime::HighVol => "high_vol",
        }
    }
}

impl Default for Regime {
    fn default() -> Self {
        Regime::Neutral
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-symbol feature vector with data age and regime label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSnapshot {
    pub symbol: String,
    /// Ordered feature map. `None` marks a feature the provider could not supply.
    pub features: BTreeMap<String, Option<f64>>,
    /// Age of the underlying data in seconds.
    pub data_age_secs: f64,
    /// Regime label as reported by the provider.
    #[serde(default)]
    pub regime: String,
    /// Last traded price, when the provider has one.
    #[serde(default)]
    pub last_price: Option<f64>,
}

impl FeatureSnapshot {
    pub fn new(symbol: impl Into<String>, data_age_secs: f64, regime: Regime) -> Self {
        Self {
            symbol: symbol.into(),
            features: BTreeMap::new(),
            data_age_secs,
            regime: regime.as_str().to_string(),
            last_price: None,
        }
    }

    /// Builder: set a present feature value.
    pub fn with(mut self, name: &str, value: f64) -> Self {
        self.features.insert(name.to_string(), Some(value));
        self
    }

    /// Builder: record a feature as explicitly missing.
    pub fn with_missing(mut self, name: &str) -> Self {
        self.features.insert(name.to_string(), None);
        self
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.last_price = Some(price);
        self
    }

    /// Present, finite value of a feature. NaN and infinities count as absent.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.features
            .get(name)
            .copied()
            .flatten()
            .filter(|v| v.is_finite())
    }

    pub fn regime(&self) -> Regime {
        Regime::from_label(&self.regime)
    }

    /// Last price if positive and finite.
    pub fn price(&self) -> Option<f64> {
        self.last_price.filter(|p| p.is_finite() && *p > 0.0)
    }

    /// Technical context for the secondary gate filters, if any was supplied.
    pub fn technicals(&self) -> Option<Technicals> {
        let moving_average = self.get(MOVING_AVERAGE);
        let resistance = self.get(RESISTANCE);
        (moving_average.is_some() || resistance.is_some()).then_some(Technicals {
            moving_average,
            resistance,
        })
    }
}
