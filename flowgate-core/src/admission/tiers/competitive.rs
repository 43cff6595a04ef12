//! Competitive tier: a strong candidate replaces the lowest scorer when it
//! beats it by a clear margin.

use crate::admission::{AdmissionConfig, DisplacementContext, DisplacementTier, Tier, VictimChoice};

#[derive(Debug, Clone)]
pub struct CompetitiveTier {
    pub threshold: f64,
    pub min_advantage: f64,
}

impl CompetitiveTier {
    pub fn from_config(config: &AdmissionConfig) -> Self {
        Self {
            threshold: config.competitive_threshold,
            min_advantage: config.competitive_min_advantage,
        }
    }
}

impl DisplacementTier for CompetitiveTier {
    fn tier(&self) -> Tier {
        Tier::Competitive
    }

    fn select(&self, ctx: &DisplacementContext<'_>) -> Option<VictimChoice> {
        let score = ctx.candidate_score();
        if score <= self.threshold {
            return None;
        }
        let lowest = ctx.lowest_scoring()?;
        (score - lowest.score > self.min_advantage).then(|| lowest.clone())
    }

    fn thresholds(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("competitive_threshold", self.threshold),
            ("competitive_min_advantage", self.min_advantage),
        ]
    }
}
