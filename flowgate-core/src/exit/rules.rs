//! Built-in exit rules.

use std::collections::BTreeMap;

use super::{ExitContext, ExitReason, ExitRule};

/// Current score has decayed below a fraction of the entry score.
///
/// A non-positive entry score fires immediately, snapshot or not. Otherwise a
/// defaulted current score carries no information and never fires.
#[derive(Debug, Clone)]
pub struct SignalDecayRule {
    pub threshold: f64,
}

impl SignalDecayRule {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl ExitRule for SignalDecayRule {
    fn reason(&self) -> ExitReason {
        ExitReason::SignalDecay
    }

    fn fires(&self, ctx: &ExitContext<'_>, evidence: &mut BTreeMap<String, f64>) -> bool {
        let Some(ratio) = ctx.decay_ratio else {
            evidence.insert("decay_threshold".to_string(), self.threshold);
            return true;
        };
        if ctx.current.defaulted {
            return false;
        }
        evidence.insert("decay_threshold".to_string(), self.threshold);
        evidence.insert("decay_ratio".to_string(), ratio);
        ratio < self.threshold
    }
}

/// Directional flow has turned against the position.
#[derive(Debug, Clone)]
pub struct FlowReversalRule {
    pub threshold: f64,
}

impl FlowReversalRule {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl ExitRule for FlowReversalRule {
    fn reason(&self) -> ExitReason {
        ExitReason::FlowReversal
    }

    fn fires(&self, ctx: &ExitContext<'_>, evidence: &mut BTreeMap<String, f64>) -> bool {
        let Some(bias) = ctx.flow_bias else {
            return false;
        };
        // positive = flow against the held side
        let opposing = -bias * ctx.position.side.sign();
        evidence.insert("flow_bias".to_string(), bias);
        opposing > self.threshold
    }
}

/// Held for longer than the maximum hold duration.
#[derive(Debug, Clone)]
pub struct TimeExitRule {
    pub max_hold_secs: f64,
}

impl TimeExitRule {
    pub fn new(max_hold_secs: f64) -> Self {
        Self { max_hold_secs }
    }
}

impl ExitRule for TimeExitRule {
    fn reason(&self) -> ExitReason {
        ExitReason::TimeExit
    }

    fn fires(&self, ctx: &ExitContext<'_>, evidence: &mut BTreeMap<String, f64>) -> bool {
        evidence.insert("max_hold_secs".to_string(), self.max_hold_secs);
        ctx.age_secs >= self.max_hold_secs
    }
}

/// Mature position going nowhere.
#[derive(Debug, Clone)]
pub struct StaleTradeRule {
    pub after_secs: f64,
    pub pnl_band_pct: f64,
}

impl StaleTradeRule {
    pub fn new(after_secs: f64, pnl_band_pct: f64) -> Self {
        Self {
            after_secs,
            pnl_band_pct,
        }
    }
}

impl ExitRule for StaleTradeRule {
    fn reason(&self) -> ExitReason {
        ExitReason::StaleTrade
    }

    fn fires(&self, ctx: &ExitContext<'_>, _evidence: &mut BTreeMap<String, f64>) -> bool {
        ctx.age_secs >= self.after_secs && ctx.pnl_pct.abs() < self.pnl_band_pct
    }
}

#[derive(Debug, Clone)]
pub struct ProfitTargetRule {
    pub target_pct: f64,
}

impl ProfitTargetRule {
    pub fn new(target_pct: f64) -> Self {
        Self { target_pct }
    }
}

impl ExitRule for ProfitTargetRule {
    fn reason(&self) -> ExitReason {
        ExitReason::ProfitTarget
    }

    fn fires(&self, ctx: &ExitContext<'_>, evidence: &mut BTreeMap<String, f64>) -> bool {
        evidence.insert("profit_target_pct".to_string(), self.target_pct);
        ctx.pnl_pct >= self.target_pct
    }
}

#[derive(Debug, Clone)]
pub struct StopLossRule {
    /// Loss magnitude, positive.
    pub stop_pct: f64,
}

impl StopLossRule {
    pub fn new(stop_pct: f64) -> Self {
        Self { stop_pct }
    }
}

impl ExitRule for StopLossRule {
    fn reason(&self) -> ExitReason {
        ExitReason::StopLoss
    }

    fn fires(&self, ctx: &ExitContext<'_>, evidence: &mut BTreeMap<String, f64>) -> bool {
        evidence.insert("stop_loss_pct".to_string(), self.stop_pct);
        ctx.pnl_pct <= -self.stop_pct
    }
}
