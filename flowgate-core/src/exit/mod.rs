//! Exit evaluator — re-scores every held position each cycle and derives a
//! composite exit decision.
//!
//! All firing rules are recorded, not just the first, and joined with `+` in
//! the fixed `ExitReason` order so the reason string is stable across runs.

pub mod rules;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

use crate::config::ConfigError;
use crate::domain::{FeatureSnapshot, Position, FLOW_BIAS};
use crate::scoring::{self, CompositeScore, WeightConfig};

pub use rules::{
    FlowReversalRule, ProfitTargetRule, SignalDecayRule, StaleTradeRule, StopLossRule,
    TimeExitRule,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExitConfig {
    /// Exit when current / entry score falls below this ratio.
    pub decay_threshold: f64,
    /// Exit when `flow_bias` opposes the side by more than this.
    pub reversal_threshold: f64,
    pub max_hold_secs: Option<u64>,
    pub stale_after_secs: Option<u64>,
    /// |PnL%| below this counts as stale once `stale_after_secs` has passed.
    pub stale_pnl_band_pct: f64,
    pub profit_target_pct: Option<f64>,
    pub stop_loss_pct: Option<f64>,
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            decay_threshold: 0.6,
            reversal_threshold: 0.3,
            max_hold_secs: Some(5 * 24 * 3600),
            stale_after_secs: Some(4 * 3600),
            stale_pnl_band_pct: 0.25,
            profit_target_pct: Some(8.0),
            stop_loss_pct: Some(4.0),
        }
    }
}

impl ExitConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.decay_threshold.is_finite() && (0.0..=1.0).contains(&self.decay_threshold)) {
            return Err(ConfigError::invalid("exit.decay_threshold", "must lie in [0, 1]"));
        }
        if !(self.reversal_threshold.is_finite() && (0.0..1.0).contains(&self.reversal_threshold)) {
            return Err(ConfigError::invalid("exit.reversal_threshold", "must lie in [0, 1)"));
        }
        if !(self.stale_pnl_band_pct.is_finite() && self.stale_pnl_band_pct >= 0.0) {
            return Err(ConfigError::invalid("exit.stale_pnl_band_pct", "must be non-negative"));
        }
        for (field, value) in [
            ("exit.profit_target_pct", self.profit_target_pct),
            ("exit.stop_loss_pct", self.stop_loss_pct),
        ] {
            if let Some(v) = value {
                if !(v.is_finite() && v > 0.0) {
                    return Err(ConfigError::invalid(field, "must be positive when set"));
                }
            }
        }
        if self.max_hold_secs == Some(0) {
            return Err(ConfigError::invalid("exit.max_hold_secs", "must be positive when set"));
        }
        Ok(())
    }
}

/// A single exit trigger. Declaration order is the order reasons appear in
/// the composite reason string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    SignalDecay,
    FlowReversal,
    TimeExit,
    StaleTrade,
    ProfitTarget,
    StopLoss,
    /// Closed by the admission controller to make room. Never produced by
    /// the evaluator.
    Displacement,
}

impl ExitReason {
    pub fn code(&self) -> &'static str {
        match self {
            ExitReason::SignalDecay => "signal_decay",
            ExitReason::FlowReversal => "flow_reversal",
            ExitReason::TimeExit => "time_exit",
            ExitReason::StaleTrade => "stale_trade",
            ExitReason::ProfitTarget => "profit_target",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::Displacement => "displacement",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Everything a rule may look at for one position.
pub struct ExitContext<'a> {
    pub position: &'a Position,
    pub current: &'a CompositeScore,
    /// `None` when the entry score is non-positive.
    pub decay_ratio: Option<f64>,
    pub flow_bias: Option<f64>,
    pub pnl_pct: f64,
    pub age_secs: f64,
}

/// One exit condition. Rules are pure and independent of each other.
pub trait ExitRule: Send + Sync {
    fn reason(&self) -> ExitReason;

    /// Whether the rule fires. May add numeric evidence either way.
    fn fires(&self, ctx: &ExitContext<'_>, evidence: &mut BTreeMap<String, f64>) -> bool;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitDecision {
    pub symbol: String,
    /// Sorted, deduplicated.
    pub reasons: Vec<ExitReason>,
    pub current_score: f64,
    pub entry_score: f64,
    pub decay_ratio: Option<f64>,
    pub pnl_pct: f64,
    pub age_secs: f64,
    pub score_defaulted: bool,
    pub evidence: BTreeMap<String, f64>,
}

impl ExitDecision {
    pub fn should_exit(&self) -> bool {
        !self.reasons.is_empty()
    }

    /// Composite reason string, e.g. `signal_decay+stop_loss`.
    pub fn reason_code(&self) -> String {
        self.reasons
            .iter()
            .map(|r| r.code())
            .collect::<Vec<_>>()
            .join("+")
    }
}

pub struct ExitEvaluator {
    rules: Vec<Box<dyn ExitRule>>,
}

impl ExitEvaluator {
    /// Build the rule set implied by the config. Optional bands are only
    /// installed when configured.
    pub fn from_config(config: &ExitConfig) -> Self {
        let mut rules: Vec<Box<dyn ExitRule>> = vec![
            Box::new(SignalDecayRule::new(config.decay_threshold)),
            Box::new(FlowReversalRule::new(config.reversal_threshold)),
        ];
        if let Some(max_hold) = config.max_hold_secs {
            rules.push(Box::new(TimeExitRule::new(max_hold as f64)));
        }
        if let Some(after) = config.stale_after_secs {
            rules.push(Box::new(StaleTradeRule::new(after as f64, config.stale_pnl_band_pct)));
        }
        if let Some(target) = config.profit_target_pct {
            rules.push(Box::new(ProfitTargetRule::new(target)));
        }
        if let Some(stop) = config.stop_loss_pct {
            rules.push(Box::new(StopLossRule::new(stop)));
        }
        Self { rules }
    }

    pub fn with_rule(mut self, rule: Box<dyn ExitRule>) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rule_reasons(&self) -> Vec<ExitReason> {
        self.rules.iter().map(|r| r.reason()).collect()
    }

    /// Evaluate against an already computed current score.
    pub fn evaluate_scored(
        &self,
        position: &Position,
        current: &CompositeScore,
        snapshot: Option<&FeatureSnapshot>,
        now: DateTime<Utc>,
    ) -> ExitDecision {
        let decay_ratio = (position.entry_score > 0.0).then(|| current.score / position.entry_score);
        let mark = snapshot.and_then(|s| s.price());
        let ctx = ExitContext {
            position,
            current,
            decay_ratio,
            flow_bias: snapshot.and_then(|s| s.get(FLOW_BIAS)),
            pnl_pct: position.pnl_pct(mark),
            age_secs: position.age_secs(now),
        };

        let mut evidence = BTreeMap::new();
        evidence.insert("current_score".to_string(), current.score);
        evidence.insert("entry_score".to_string(), position.entry_score);
        evidence.insert("pnl_pct".to_string(), ctx.pnl_pct);
        evidence.insert("age_secs".to_string(), ctx.age_secs);

        let mut reasons: Vec<ExitReason> = self
            .rules
            .iter()
            .filter(|rule| rule.fires(&ctx, &mut evidence))
            .map(|rule| rule.reason())
            .collect();
        reasons.sort();
        reasons.dedup();

        let decision = ExitDecision {
            symbol: position.symbol.clone(),
            reasons,
            current_score: current.score,
            entry_score: position.entry_score,
            decay_ratio,
            pnl_pct: ctx.pnl_pct,
            age_secs: ctx.age_secs,
            score_defaulted: current.defaulted,
            evidence,
        };
        debug!(
            symbol = %decision.symbol,
            exit = decision.should_exit(),
            reasons = %decision.reason_code(),
            "exit evaluated"
        );
        decision
    }

    /// Re-score from the current snapshot (neutral if absent) and evaluate.
    pub fn evaluate(
        &self,
        position: &Position,
        snapshot: Option<&FeatureSnapshot>,
        weights: &WeightConfig,
        now: DateTime<Utc>,
    ) -> ExitDecision {
        let current = scoring::score_or_neutral(&position.symbol, snapshot, weights);
        self.evaluate_scored(position, &current, snapshot, now)
    }
}
