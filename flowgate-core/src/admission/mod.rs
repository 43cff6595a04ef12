//! Admission and displacement — decides whether a gate-eligible candidate is
//! admitted outright, displaces a held position, or is rejected.
//!
//! The controller runs a small state machine per candidate:
//!
//! 1. Pre-checks: already held, symbol under cooldown, invalid size.
//! 2. Capacity available → Admit.
//! 3. Capacity full → try the displacement tiers in priority order
//!    (elite, competitive, force-close, legacy); the first tier that names a
//!    victim decides. No victim → Reject `no_displacement_candidate`.
//! 4. Displace → exactly one close call for the victim. Success records a
//!    cooldown and proceeds to Admit; failure rejects with
//!    `displacement_failed` and touches nothing else.
//!
//! Planning is pure; only `AdmissionController::execute` talks to the
//! execution gateway and mutates the book and cooldown registry.

pub mod controller;
pub mod tiers;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::config::ConfigError;
use crate::cooldown::CooldownRegistry;
use crate::domain::{Candidate, Position, PositionBook, Side};

pub use controller::AdmissionController;
pub use tiers::{default_tiers, CompetitiveTier, EliteTier, ForceCloseTier, LegacyTier};

/// Broker primitives as the controller sees them: success or failure only.
///
/// Implementations own timeouts and retries; a `false` return means the
/// retry budget was exhausted.
pub trait ExecutionGateway {
    fn close_position(&self, symbol: &str) -> bool;
    fn open_position(&self, symbol: &str, side: Side, size: f64) -> bool;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdmissionConfig {
    /// Capacity limit of the position book.
    pub max_positions: usize,
    /// Book size at which the force-close tier becomes available.
    pub hard_cap: usize,

    pub elite_threshold: f64,
    /// Elite victims score below this...
    pub elite_score_floor: f64,
    /// ...or are losing more than this (percentage points, negative).
    pub elite_loss_floor_pct: f64,

    pub competitive_threshold: f64,
    pub competitive_min_advantage: f64,

    pub force_threshold: f64,

    pub legacy_min_age_secs: u64,
    pub legacy_max_abs_pnl_pct: f64,
    pub legacy_min_advantage: f64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_positions: 16,
            hard_cap: 16,
            elite_threshold: 3.6,
            elite_score_floor: 3.0,
            elite_loss_floor_pct: -1.5,
            competitive_threshold: 4.0,
            competitive_min_advantage: 0.75,
            force_threshold: 4.5,
            legacy_min_age_secs: 30 * 60,
            legacy_max_abs_pnl_pct: 1.0,
            legacy_min_advantage: 0.5,
        }
    }
}

impl AdmissionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_positions == 0 {
            return Err(ConfigError::invalid("admission.max_positions", "must be at least 1"));
        }
        if self.hard_cap == 0 || self.hard_cap > self.max_positions {
            return Err(ConfigError::invalid(
                "admission.hard_cap",
                format!("must lie in [1, max_positions={}]", self.max_positions),
            ));
        }
        for (field, value) in [
            ("admission.elite_threshold", self.elite_threshold),
            ("admission.elite_score_floor", self.elite_score_floor),
            ("admission.elite_loss_floor_pct", self.elite_loss_floor_pct),
            ("admission.competitive_threshold", self.competitive_threshold),
            ("admission.force_threshold", self.force_threshold),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::invalid(field, "must be finite"));
            }
        }
        for (field, value) in [
            ("admission.competitive_min_advantage", self.competitive_min_advantage),
            ("admission.legacy_max_abs_pnl_pct", self.legacy_max_abs_pnl_pct),
            ("admission.legacy_min_advantage", self.legacy_min_advantage),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::invalid(field, "must be finite and non-negative"));
            }
        }
        if self.elite_loss_floor_pct > 0.0 {
            return Err(ConfigError::invalid(
                "admission.elite_loss_floor_pct",
                "is a loss floor and must not be positive",
            ));
        }
        Ok(())
    }
}

/// Displacement policy tier, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Elite,
    Competitive,
    ForceClose,
    Legacy,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Elite => "elite",
            Tier::Competitive => "competitive",
            Tier::ForceClose => "force_close",
            Tier::Legacy => "legacy",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current mark of a held position: re-scored value and PnL.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeldMark {
    pub score: f64,
    pub pnl_pct: f64,
}

/// A held position as the tiers see it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeldSnapshot {
    pub symbol: String,
    pub score: f64,
    pub pnl_pct: f64,
    pub age_secs: f64,
}

/// Position chosen for displacement.
pub type VictimChoice = HeldSnapshot;

/// Inputs a tier evaluates. Excluded positions are already filtered out of
/// `held`; `held_count` is the full book size.
pub struct DisplacementContext<'a> {
    pub candidate: &'a Candidate,
    pub held: &'a [HeldSnapshot],
    pub held_count: usize,
    pub cooldowns: &'a CooldownRegistry,
    pub now: DateTime<Utc>,
}

impl DisplacementContext<'_> {
    pub fn candidate_score(&self) -> f64 {
        self.candidate.value()
    }

    /// Lowest current score; ties go to the worse PnL, then the symbol.
    pub fn lowest_scoring(&self) -> Option<&HeldSnapshot> {
        self.held.iter().min_by(|a, b| victim_order(a, b))
    }
}

/// Victim ordering shared by the tiers: lowest score, then worst PnL, then
/// symbol for determinism.
pub fn victim_order(a: &HeldSnapshot, b: &HeldSnapshot) -> std::cmp::Ordering {
    a.score
        .total_cmp(&b.score)
        .then(a.pnl_pct.total_cmp(&b.pnl_pct))
        .then_with(|| a.symbol.cmp(&b.symbol))
}

/// A displacement policy. Pure: it only names a victim, never acts.
pub trait DisplacementTier: Send + Sync {
    fn tier(&self) -> Tier;

    /// Return the victim this tier would displace, or `None` to fall through.
    fn select(&self, ctx: &DisplacementContext<'_>) -> Option<VictimChoice>;

    /// Thresholds and margins this tier compares against, keyed for the
    /// decision log.
    fn thresholds(&self) -> Vec<(&'static str, f64)> {
        Vec::new()
    }
}

/// Record of one displacement evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplacementDecision {
    pub candidate: String,
    pub candidate_score: f64,
    pub victim: Option<VictimChoice>,
    pub tier: Option<Tier>,
    /// Candidate score minus victim score.
    pub score_delta: Option<f64>,
    /// Tiers evaluated, in order, up to and including the deciding one.
    pub tiers_tried: Vec<Tier>,
    /// Thresholds of every tier in `tiers_tried`.
    #[serde(default)]
    pub thresholds: BTreeMap<String, f64>,
}

impl DisplacementDecision {
    pub fn evidence(&self) -> BTreeMap<String, f64> {
        let mut e = BTreeMap::new();
        e.insert("candidate_score".to_string(), self.candidate_score);
        if let Some(v) = &self.victim {
            e.insert("victim_score".to_string(), v.score);
            e.insert("victim_pnl_pct".to_string(), v.pnl_pct);
            e.insert("victim_age_secs".to_string(), v.age_secs);
        }
        if let Some(d) = self.score_delta {
            e.insert("score_delta".to_string(), d);
        }
        e.extend(self.thresholds.iter().map(|(k, v)| (k.clone(), *v)));
        e
    }
}

/// Why a candidate was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    AlreadyHeld,
    SymbolCooldown,
    InvalidSize,
    NoDisplacementCandidate,
    DisplacementFailed,
    OpenFailed,
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::AlreadyHeld => "already_held",
            RejectReason::SymbolCooldown => "symbol_cooldown",
            RejectReason::InvalidSize => "invalid_size",
            RejectReason::NoDisplacementCandidate => "no_displacement_candidate",
            RejectReason::DisplacementFailed => "displacement_failed",
            RejectReason::OpenFailed => "open_failed",
        }
    }

    /// Operational failures, as opposed to policy rejections.
    pub fn is_operational(&self) -> bool {
        matches!(self, RejectReason::DisplacementFailed | RejectReason::OpenFailed)
    }
}

/// Pure decision before any broker call.
#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionPlan {
    Admit,
    Displace(DisplacementDecision),
    Reject {
        reason: RejectReason,
        decision: Option<DisplacementDecision>,
    },
}

/// State of the portfolio a plan is computed against.
pub struct PortfolioView<'a> {
    pub book: &'a PositionBook,
    /// Current marks of held positions. Positions without a mark fall back
    /// to their entry score and flat PnL.
    pub marks: &'a BTreeMap<String, HeldMark>,
    pub cooldowns: &'a CooldownRegistry,
    /// Symbols already acted on this cycle; never displacement victims.
    pub excluded: &'a BTreeSet<String>,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionResult {
    Admitted,
    Rejected(RejectReason),
}

/// Terminal state of one admission attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct AdmissionOutcome {
    pub symbol: String,
    pub result: AdmissionResult,
    pub decision: Option<DisplacementDecision>,
    /// Victim closed during this attempt. Set even if the subsequent open failed.
    pub displaced: Option<Position>,
}

impl AdmissionOutcome {
    pub fn is_admitted(&self) -> bool {
        matches!(self.result, AdmissionResult::Admitted)
    }

    pub fn reason_code(&self) -> &'static str {
        match self.result {
            AdmissionResult::Admitted if self.displaced.is_some() => "displaced_and_admitted",
            AdmissionResult::Admitted => "admitted",
            AdmissionResult::Rejected(r) => r.code(),
        }
    }
}
