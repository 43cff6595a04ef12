//! Price extension filter — blocks entries that have already run too far
//! from their moving average in the trade direction.
//!
//! extension = (price - MA) / MA. Longs block when extension > max; shorts
//! block when -extension > max. Candidates without a price or moving
//! average pass.

use std::collections::BTreeMap;

use crate::domain::{Candidate, Side};

use super::{GateVerdict, TechnicalFilter};

#[derive(Debug, Clone)]
pub struct PriceExtensionFilter {
    /// Maximum extension as a fraction (0.05 = 5%).
    pub max_extension: f64,
}

impl PriceExtensionFilter {
    pub fn new(max_extension: f64) -> Self {
        assert!(max_extension > 0.0, "max_extension must be positive");
        Self { max_extension }
    }
}

impl TechnicalFilter for PriceExtensionFilter {
    fn name(&self) -> &str {
        "price_extension"
    }

    fn check(&self, candidate: &Candidate, evidence: &mut BTreeMap<String, f64>) -> Option<GateVerdict> {
        let price = candidate.price.filter(|p| *p > 0.0)?;
        let ma = candidate
            .technicals
            .as_ref()
            .and_then(|t| t.moving_average)
            .filter(|m| *m > 0.0)?;

        let extension = (price - ma) / ma;
        let directional = match candidate.side {
            Side::Long => extension,
            Side::Short => -extension,
        };
        evidence.insert("extension_pct".to_string(), extension);
        evidence.insert("max_extension_pct".to_string(), self.max_extension);

        (directional > self.max_extension).then_some(GateVerdict::PriceExtended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Technicals;
    use crate::scoring::{CompositeScore, WeightConfig};

    fn candidate(side: Side, price: f64, ma: Option<f64>) -> Candidate {
        let score = CompositeScore::neutral("AAPL", &WeightConfig::default());
        Candidate::new(side, score, 1.0)
            .with_price(price)
            .with_technicals(Technicals {
                moving_average: ma,
                resistance: None,
            })
    }

    #[test]
    fn long_extended_above_ma_blocks() {
        let f = PriceExtensionFilter::new(0.05);
        let mut ev = BTreeMap::new();
        assert_eq!(
            f.check(&candidate(Side::Long, 110.0, Some(100.0)), &mut ev),
            Some(GateVerdict::PriceExtended)
        );
        assert!((ev["extension_pct"] - 0.10).abs() < 1e-12);
    }

    #[test]
    fn long_near_ma_passes() {
        let f = PriceExtensionFilter::new(0.05);
        let mut ev = BTreeMap::new();
        assert_eq!(f.check(&candidate(Side::Long, 103.0, Some(100.0)), &mut ev), None);
    }

    #[test]
    fn short_extended_below_ma_blocks() {
        let f = PriceExtensionFilter::new(0.05);
        let mut ev = BTreeMap::new();
        assert_eq!(
            f.check(&candidate(Side::Short, 90.0, Some(100.0)), &mut ev),
            Some(GateVerdict::PriceExtended)
        );
        // far above the MA is fine for a short
        assert_eq!(f.check(&candidate(Side::Short, 120.0, Some(100.0)), &mut ev), None);
    }

    #[test]
    fn missing_ma_passes() {
        let f = PriceExtensionFilter::new(0.05);
        let mut ev = BTreeMap::new();
        assert_eq!(f.check(&candidate(Side::Long, 150.0, None), &mut ev), None);
        assert!(ev.is_empty());
    }
}
