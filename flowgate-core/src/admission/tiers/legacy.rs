//! Legacy tier: swap out a mature, roughly flat position for a candidate
//! that beats it by a minimum advantage. The only tier that respects
//! cooldowns when choosing a victim.

use crate::admission::{AdmissionConfig, DisplacementContext, DisplacementTier, Tier, VictimChoice};

#[derive(Debug, Clone)]
pub struct LegacyTier {
    pub min_age_secs: f64,
    pub max_abs_pnl_pct: f64,
    pub min_advantage: f64,
}

impl LegacyTier {
    pub fn from_config(config: &AdmissionConfig) -> Self {
        Self {
            min_age_secs: config.legacy_min_age_secs as f64,
            max_abs_pnl_pct: config.legacy_max_abs_pnl_pct,
            min_advantage: config.legacy_min_advantage,
        }
    }
}

impl DisplacementTier for LegacyTier {
    fn tier(&self) -> Tier {
        Tier::Legacy
    }

    fn select(&self, ctx: &DisplacementContext<'_>) -> Option<VictimChoice> {
        let score = ctx.candidate_score();
        ctx.held
            .iter()
            .filter(|h| h.age_secs >= self.min_age_secs)
            .filter(|h| h.pnl_pct.abs() <= self.max_abs_pnl_pct)
            .filter(|h| score - h.score >= self.min_advantage)
            .filter(|h| !ctx.cooldowns.is_cooled_down(&h.symbol, ctx.now))
            // largest advantage = lowest score; symbol breaks exact ties
            .min_by(|a, b| a.score.total_cmp(&b.score).then_with(|| a.symbol.cmp(&b.symbol)))
            .cloned()
    }

    fn thresholds(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("legacy_min_age_secs", self.min_age_secs),
            ("legacy_max_abs_pnl_pct", self.max_abs_pnl_pct),
            ("legacy_min_advantage", self.min_advantage),
        ]
    }
}
