//! Force-close tier: exactly at the hard cap, a very strong candidate always
//! evicts the lowest scorer.

use crate::admission::{AdmissionConfig, DisplacementContext, DisplacementTier, Tier, VictimChoice};

#[derive(Debug, Clone)]
pub struct ForceCloseTier {
    pub threshold: f64,
    pub hard_cap: usize,
}

impl ForceCloseTier {
    pub fn from_config(config: &AdmissionConfig) -> Self {
        Self {
            threshold: config.force_threshold,
            hard_cap: config.hard_cap,
        }
    }
}

impl DisplacementTier for ForceCloseTier {
    fn tier(&self) -> Tier {
        Tier::ForceClose
    }

    fn select(&self, ctx: &DisplacementContext<'_>) -> Option<VictimChoice> {
        if ctx.held_count != self.hard_cap || ctx.candidate_score() <= self.threshold {
            return None;
        }
        ctx.lowest_scoring().cloned()
    }

    fn thresholds(&self) -> Vec<(&'static str, f64)> {
        vec![("force_threshold", self.threshold), ("hard_cap", self.hard_cap as f64)]
    }
}
