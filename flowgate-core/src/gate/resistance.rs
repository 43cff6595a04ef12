//! Resistance proximity filter for long entries.
//!
//! Blocks a long whose price sits within `buffer` (fractional) below a known
//! resistance level. Shorts and candidates already above resistance pass.

use std::collections::BTreeMap;

use crate::domain::{Candidate, Side};

use super::{GateVerdict, TechnicalFilter};

#[derive(Debug, Clone)]
pub struct ResistanceFilter {
    pub buffer: f64,
}

impl ResistanceFilter {
    pub fn new(buffer: f64) -> Self {
        assert!(buffer > 0.0, "buffer must be positive");
        Self { buffer }
    }
}

impl TechnicalFilter for ResistanceFilter {
    fn name(&self) -> &str {
        "resistance"
    }

    fn check(&self, candidate: &Candidate, evidence: &mut BTreeMap<String, f64>) -> Option<GateVerdict> {
        if candidate.side != Side::Long {
            return None;
        }
        let price = candidate.price.filter(|p| *p > 0.0)?;
        let resistance = candidate.technicals.as_ref().and_then(|t| t.resistance)?;
        if resistance <= price {
            return None;
        }

        let headroom = (resistance - price) / price;
        evidence.insert("resistance_headroom_pct".to_string(), headroom);
        evidence.insert("resistance_buffer_pct".to_string(), self.buffer);

        (headroom < self.buffer).then_some(GateVerdict::NearResistance)
    }
}
