//! Elite tier: a very strong candidate may replace a weak or losing position.

use crate::admission::{
    victim_order, AdmissionConfig, DisplacementContext, DisplacementTier, Tier, VictimChoice,
};

#[derive(Debug, Clone)]
pub struct EliteTier {
    pub threshold: f64,
    pub score_floor: f64,
    pub loss_floor_pct: f64,
}

impl EliteTier {
    pub fn from_config(config: &AdmissionConfig) -> Self {
        Self {
            threshold: config.elite_threshold,
            score_floor: config.elite_score_floor,
            loss_floor_pct: config.elite_loss_floor_pct,
        }
    }
}

impl DisplacementTier for EliteTier {
    fn tier(&self) -> Tier {
        Tier::Elite
    }

    fn select(&self, ctx: &DisplacementContext<'_>) -> Option<VictimChoice> {
        if ctx.candidate_score() <= self.threshold {
            return None;
        }
        ctx.held
            .iter()
            .filter(|h| h.score < self.score_floor || h.pnl_pct < self.loss_floor_pct)
            .min_by(|a, b| victim_order(a, b))
            .cloned()
    }

    fn thresholds(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("elite_threshold", self.threshold),
            ("elite_score_floor", self.score_floor),
            ("elite_loss_floor_pct", self.loss_floor_pct),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::tiers::fixtures::{candidate, held, t0};
    use crate::cooldown::CooldownRegistry;
    use chrono::Duration;

    fn select(score: f64, held_list: &[VictimChoice]) -> Option<VictimChoice> {
        let tier = EliteTier::from_config(&AdmissionConfig::default());
        let cand = candidate("AAPL", score);
        let cooldowns = CooldownRegistry::new(Duration::hours(1));
        let ctx = DisplacementContext {
            candidate: &cand,
            held: held_list,
            held_count: held_list.len(),
            cooldowns: &cooldowns,
            now: t0(),
        };
        tier.select(&ctx)
    }

    #[test]
    fn weak_position_is_displaced() {
        let held_list = vec![held("SPY", 3.8, 0.4, 600.0), held("IWM", 2.1, 0.2, 600.0)];
        let victim = select(4.3, &held_list).unwrap();
        assert_eq!(victim.symbol, "IWM");
    }

    #[test]
    fn losing_position_qualifies_despite_score() {
        let held_list = vec![held("SPY", 3.8, -2.0, 600.0), held("QQQ", 3.5, 0.1, 600.0)];
        assert_eq!(select(4.0, &held_list).unwrap().symbol, "SPY");
    }

    #[test]
    fn threshold_is_strict() {
        let held_list = vec![held("IWM", 2.1, 0.2, 600.0)];
        assert!(select(3.6, &held_list).is_none());
        assert!(select(3.61, &held_list).is_some());
    }

    #[test]
    fn ties_go_to_worse_pnl() {
        let held_list = vec![held("A", 2.5, 0.5, 600.0), held("B", 2.5, -0.3, 600.0)];
        assert_eq!(select(4.0, &held_list).unwrap().symbol, "B");
    }

    #[test]
    fn no_weak_or_losing_position_falls_through() {
        let held_list = vec![held("SPY", 3.2, -0.5, 600.0)];
        assert!(select(5.0, &held_list).is_none());
    }
}
