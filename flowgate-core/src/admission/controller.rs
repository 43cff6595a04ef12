//! Admission controller — plans and executes one candidate's admission.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use crate::cooldown::CooldownRegistry;
use crate::domain::{Candidate, Position, PositionBook};

use super::{
    default_tiers, AdmissionConfig, AdmissionOutcome, AdmissionPlan, AdmissionResult,
    DisplacementContext, DisplacementDecision, DisplacementTier, ExecutionGateway, HeldMark, HeldSnapshot,
    PortfolioView, RejectReason,
};

pub struct AdmissionController {
    config: AdmissionConfig,
    tiers: Vec<Box<dyn DisplacementTier>>,
}

impl AdmissionController {
    pub fn from_config(config: &AdmissionConfig) -> Self {
        Self {
            config: config.clone(),
            tiers: default_tiers(config),
        }
    }

    /// Custom tier chain, evaluated in the given order.
    pub fn with_tiers(config: &AdmissionConfig, tiers: Vec<Box<dyn DisplacementTier>>) -> Self {
        Self {
            config: config.clone(),
            tiers,
        }
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    fn has_capacity(&self, book: &PositionBook) -> bool {
        !book.is_full() && book.len() < self.config.max_positions
    }

    /// Victim set for displacement: held positions not excluded this cycle.
    fn held_snapshots(&self, view: &PortfolioView<'_>) -> Vec<HeldSnapshot> {
        view.book
            .iter()
            .filter(|p| !view.excluded.contains(&p.symbol))
            .map(|p| {
                let (score, pnl_pct) = view
                    .marks
                    .get(&p.symbol)
                    .map(|m| (m.score, m.pnl_pct))
                    .unwrap_or((p.entry_score, 0.0));
                HeldSnapshot {
                    symbol: p.symbol.clone(),
                    score,
                    pnl_pct,
                    age_secs: p.age_secs(view.now),
                }
            })
            .collect()
    }

    /// Decide what to do with `candidate`. Pure: no broker calls, no mutation.
    pub fn plan(&self, candidate: &Candidate, view: &PortfolioView<'_>) -> AdmissionPlan {
        let reject = |reason| AdmissionPlan::Reject {
            reason,
            decision: None,
        };

        if view.book.contains(&candidate.symbol) {
            return reject(RejectReason::AlreadyHeld);
        }
        if view.cooldowns.is_cooled_down(&candidate.symbol, view.now) {
            return reject(RejectReason::SymbolCooldown);
        }
        if !(candidate.size.is_finite() && candidate.size > 0.0) {
            return reject(RejectReason::InvalidSize);
        }
        if self.has_capacity(view.book) {
            return AdmissionPlan::Admit;
        }
        // over capacity (e.g. after a capacity cut): one-for-one swaps cannot fit
        if view.book.len() > self.config.max_positions || view.book.len() > view.book.capacity() {
            debug!(
                candidate = %candidate.symbol,
                held = view.book.len(),
                capacity = self.config.max_positions,
                "book over capacity; displacement disabled"
            );
            return reject(RejectReason::NoDisplacementCandidate);
        }

        let held = self.held_snapshots(view);
        let ctx = DisplacementContext {
            candidate,
            held: &held,
            held_count: view.book.len(),
            cooldowns: view.cooldowns,
            now: view.now,
        };

        let mut decision = DisplacementDecision {
            candidate: candidate.symbol.clone(),
            candidate_score: candidate.value(),
            victim: None,
            tier: None,
            score_delta: None,
            tiers_tried: Vec::with_capacity(self.tiers.len()),
            thresholds: BTreeMap::new(),
        };

        for tier in &self.tiers {
            decision.tiers_tried.push(tier.tier());
            decision
                .thresholds
                .extend(tier.thresholds().into_iter().map(|(k, v)| (k.to_string(), v)));
            if let Some(victim) = tier.select(&ctx) {
                debug!(
                    candidate = %candidate.symbol,
                    victim = %victim.symbol,
                    tier = %tier.tier(),
                    "displacement victim selected"
                );
                decision.score_delta = Some(candidate.value() - victim.score);
                decision.tier = Some(tier.tier());
                decision.victim = Some(victim);
                return AdmissionPlan::Displace(decision);
            }
        }

        AdmissionPlan::Reject {
            reason: RejectReason::NoDisplacementCandidate,
            decision: Some(decision),
        }
    }

    /// Carry out a plan against the book and the broker.
    ///
    /// A displacement issues exactly one close call. On close failure nothing
    /// else is touched. On success the victim leaves the book and enters
    /// cooldown before the candidate is opened.
    pub fn execute(
        &self,
        plan: AdmissionPlan,
        candidate: &Candidate,
        book: &mut PositionBook,
        cooldowns: &mut CooldownRegistry,
        gateway: &dyn ExecutionGateway,
        now: DateTime<Utc>,
    ) -> AdmissionOutcome {
        let symbol = candidate.symbol.clone();
        match plan {
            AdmissionPlan::Reject { reason, decision } => AdmissionOutcome {
                symbol,
                result: AdmissionResult::Rejected(reason),
                decision,
                displaced: None,
            },
            AdmissionPlan::Admit => {
                let result = open_candidate(candidate, book, gateway, now);
                AdmissionOutcome {
                    symbol,
                    result,
                    decision: None,
                    displaced: None,
                }
            }
            AdmissionPlan::Displace(decision) => {
                let Some(victim) = decision.victim.as_ref() else {
                    return AdmissionOutcome {
                        symbol,
                        result: AdmissionResult::Rejected(RejectReason::NoDisplacementCandidate),
                        decision: Some(decision),
                        displaced: None,
                    };
                };

                if !gateway.close_position(&victim.symbol) {
                    warn!(
                        candidate = %symbol,
                        victim = %victim.symbol,
                        "displacement close failed; candidate rejected"
                    );
                    return AdmissionOutcome {
                        symbol,
                        result: AdmissionResult::Rejected(RejectReason::DisplacementFailed),
                        decision: Some(decision),
                        displaced: None,
                    };
                }

                let displaced = book.close(&victim.symbol);
                cooldowns.record(&victim.symbol, now);
                info!(
                    candidate = %symbol,
                    victim = %victim.symbol,
                    tier = ?decision.tier,
                    score_delta = ?decision.score_delta,
                    "position displaced"
                );

                let result = open_candidate(candidate, book, gateway, now);
                AdmissionOutcome {
                    symbol,
                    result,
                    decision: Some(decision),
                    displaced,
                }
            }
        }
    }

    /// Plan and execute in one step.
    #[allow(clippy::too_many_arguments)]
    pub fn admit(
        &self,
        candidate: &Candidate,
        book: &mut PositionBook,
        cooldowns: &mut CooldownRegistry,
        marks: &BTreeMap<String, HeldMark>,
        excluded: &BTreeSet<String>,
        gateway: &dyn ExecutionGateway,
        now: DateTime<Utc>,
    ) -> AdmissionOutcome {
        let plan = {
            let view = PortfolioView {
                book: &*book,
                marks,
                cooldowns: &*cooldowns,
                excluded,
                now,
            };
            self.plan(candidate, &view)
        };
        self.execute(plan, candidate, book, cooldowns, gateway, now)
    }
}

fn open_candidate(
    candidate: &Candidate,
    book: &mut PositionBook,
    gateway: &dyn ExecutionGateway,
    now: DateTime<Utc>,
) -> AdmissionResult {
    // the broker must never hold a position the book cannot record
    if book.is_full() {
        warn!(symbol = %candidate.symbol, "book full at open; candidate rejected");
        return AdmissionResult::Rejected(RejectReason::OpenFailed);
    }
    if !gateway.open_position(&candidate.symbol, candidate.side, candidate.size) {
        warn!(symbol = %candidate.symbol, "open failed");
        return AdmissionResult::Rejected(RejectReason::OpenFailed);
    }

    let position = Position::new(
        candidate.symbol.clone(),
        candidate.side,
        candidate.value(),
        now,
        candidate.size,
        candidate.price.unwrap_or(0.0),
    );
    match book.open(position) {
        Ok(()) => {
            info!(
                symbol = %candidate.symbol,
                side = candidate.side.as_str(),
                score = candidate.value(),
                "position opened"
            );
            AdmissionResult::Admitted
        }
        Err(e) => {
            warn!(symbol = %candidate.symbol, error = %e, "book rejected opened position");
            AdmissionResult::Rejected(RejectReason::OpenFailed)
        }
    }
}
