//! Cycle runner — one pass of score → exits → gate → admit/displace, plus
//! the scheduling loop that repeats it.
//!
//! Within a cycle:
//! 1. Every universe and held symbol is fetched and scored (optionally in
//!    parallel; scoring is pure).
//! 2. Exits are evaluated for all held positions and executed.
//! 3. Unheld symbols become candidates, pass through the entry gate, and the
//!    eligible ones are admitted in descending score order (ties by symbol).
//! 4. State is persisted and the event sinks flushed.
//!
//! Any symbol acted on in step 2 or 3 is excluded from the rest of the
//! cycle: it can be neither a candidate nor a displacement victim.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use flowgate_core::admission::{
    AdmissionController, AdmissionOutcome, AdmissionResult, ExecutionGateway, HeldMark, PortfolioView,
};
use flowgate_core::cooldown::CooldownRegistry;
use flowgate_core::domain::{Candidate, ConfigFingerprint, CycleId, FeatureSnapshot, PositionBook, Side, FLOW_BIAS};
use flowgate_core::exit::{ExitEvaluator, ExitReason};
use flowgate_core::gate::EntryGate;
use flowgate_core::scoring::{self, CompositeScore, WeightConfig};
use flowgate_core::{ConfigError, EngineConfig};

use crate::config::RuntimeConfig;
use crate::events::{DecisionEvent, DecisionKind, EventSink};
use crate::provider::{BestEffortProvider, FeatureProvider};
use crate::store::{StateStore, StoreError};

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("state error: {0}")]
    Store(#[from] StoreError),
}

/// Per-cycle summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle: CycleId,
    pub at: Option<DateTime<Utc>>,
    pub config_fingerprint: String,
    pub weights_version: String,
    pub scored: usize,
    pub absent_snapshots: usize,
    pub gate_rejected: usize,
    pub admitted: usize,
    pub displaced: usize,
    pub rejected: usize,
    pub exited: usize,
    pub exit_failed: usize,
    pub held: usize,
    pub persisted: bool,
}

/// A symbol's data for one cycle.
struct Scored {
    snapshot: Option<FeatureSnapshot>,
    score: CompositeScore,
}

/// Long unless directional flow says otherwise.
pub fn side_for(snapshot: Option<&FeatureSnapshot>) -> Side {
    match snapshot.and_then(|s| s.get(FLOW_BIAS)) {
        Some(bias) if bias < 0.0 => Side::Short,
        _ => Side::Long,
    }
}

pub struct CycleRunner {
    config: EngineConfig,
    fingerprint: ConfigFingerprint,
    gate: EntryGate,
    controller: AdmissionController,
    exits: ExitEvaluator,

    book: PositionBook,
    cooldowns: CooldownRegistry,
    cycle: CycleId,

    provider: BestEffortProvider,
    gateway: Box<dyn ExecutionGateway>,
    sink: Arc<dyn EventSink>,
    store: Option<StateStore>,

    universe: Vec<String>,
    order_size: f64,
    parallel_scoring: bool,
}

impl CycleRunner {
    pub fn new(
        config: EngineConfig,
        runtime: &RuntimeConfig,
        provider: Box<dyn FeatureProvider>,
        gateway: Box<dyn ExecutionGateway>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, CycleError> {
        config.validate()?;
        runtime.validate()?;
        Ok(Self {
            fingerprint: config.fingerprint(),
            gate: EntryGate::from_config(&config.gate),
            controller: AdmissionController::from_config(&config.admission),
            exits: ExitEvaluator::from_config(&config.exit),
            book: PositionBook::new(config.admission.max_positions),
            cooldowns: CooldownRegistry::new(config.cooldown.duration()),
            cycle: CycleId::default(),
            provider: BestEffortProvider::new(provider),
            gateway,
            sink,
            store: None,
            universe: runtime.universe.clone(),
            order_size: runtime.order_size,
            parallel_scoring: runtime.parallel_scoring,
            config,
        })
    }

    /// Attach persistent state, restoring cooldowns, positions and the cycle
    /// counter from it.
    pub fn with_store(mut self, store: StateStore) -> Result<Self, CycleError> {
        self.cooldowns = store.load_cooldowns(self.config.cooldown.duration())?;
        let restored = store.load_positions(self.config.admission.max_positions)?;
        if restored.book.len() > self.config.admission.max_positions {
            warn!(
                held = restored.book.len(),
                capacity = self.config.admission.max_positions,
                "restored book exceeds capacity; admissions blocked until exits catch up"
            );
        }
        self.book = restored.book;
        self.cycle = restored.last_cycle;
        self.store = Some(store);
        Ok(self)
    }

    /// Replace the in-memory book (tests, reconciliation).
    pub fn with_book(mut self, book: PositionBook) -> Self {
        self.book = book;
        self.book.set_capacity(self.config.admission.max_positions);
        self
    }

    pub fn with_cooldowns(mut self, cooldowns: CooldownRegistry) -> Self {
        self.cooldowns = cooldowns;
        self.cooldowns.set_duration(self.config.cooldown.duration());
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn fingerprint(&self) -> &ConfigFingerprint {
        &self.fingerprint
    }

    pub fn book(&self) -> &PositionBook {
        &self.book
    }

    pub fn cooldowns(&self) -> &CooldownRegistry {
        &self.cooldowns
    }

    pub fn last_cycle(&self) -> CycleId {
        self.cycle
    }

    /// Swap in a new engine config between cycles. An invalid config is
    /// refused and the current one stays in force.
    pub fn swap_config(&mut self, config: EngineConfig) -> Result<(), ConfigError> {
        if let Err(e) = config.validate() {
            error!(error = %e, "config swap refused; keeping current config");
            return Err(e);
        }
        let fingerprint = config.fingerprint();
        info!(
            from = self.fingerprint.short(),
            to = fingerprint.short(),
            weights = %config.scoring.version,
            "engine config swapped"
        );
        self.gate = EntryGate::from_config(&config.gate);
        self.controller = AdmissionController::from_config(&config.admission);
        self.exits = ExitEvaluator::from_config(&config.exit);
        self.book.set_capacity(config.admission.max_positions);
        self.cooldowns.set_duration(config.cooldown.duration());
        self.fingerprint = fingerprint;
        self.config = config;
        Ok(())
    }

    fn emit(&self, event: DecisionEvent) {
        self.sink.emit(&event);
    }

    fn score_all(&self, symbols: &[String]) -> BTreeMap<String, Scored> {
        let provider = &self.provider;
        let weights: &WeightConfig = &self.config.scoring;
        let score_one = |symbol: &String| {
            let snapshot = provider.get_snapshot(symbol);
            let score = scoring::score_or_neutral(symbol, snapshot.as_ref(), weights);
            (symbol.clone(), Scored { snapshot, score })
        };
        if self.parallel_scoring {
            symbols.par_iter().map(score_one).collect()
        } else {
            symbols.iter().map(score_one).collect()
        }
    }

    /// Run one full decision cycle at `now`.
    pub fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleReport, CycleError> {
        if let Err(e) = self.config.validate() {
            error!(error = %e, "invalid engine config; cycle halted before any decision");
            return Err(e.into());
        }

        self.cycle = self.cycle.next();
        let cycle = self.cycle;
        let mut report = CycleReport {
            cycle,
            at: Some(now),
            config_fingerprint: self.fingerprint.to_string(),
            weights_version: self.config.scoring.version.clone(),
            ..CycleReport::default()
        };

        self.provider.prepare();
        let symbols: Vec<String> = self
            .universe
            .iter()
            .cloned()
            .chain(self.book.symbols())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let scored = self.score_all(&symbols);
        report.scored = scored.len();
        report.absent_snapshots = scored.values().filter(|s| s.snapshot.is_none()).count();

        let mut touched: BTreeSet<String> = BTreeSet::new();
        self.run_exits(cycle, now, &scored, &mut touched, &mut report);
        self.run_admissions(cycle, now, &scored, &mut touched, &mut report);

        report.held = self.book.len();
        report.persisted = self.persist(now);
        self.sink.flush();

        info!(
            cycle = %cycle,
            config = self.fingerprint.short(),
            admitted = report.admitted,
            displaced = report.displaced,
            rejected = report.rejected,
            exited = report.exited,
            held = report.held,
            "cycle complete"
        );
        Ok(report)
    }

    fn run_exits(
        &mut self,
        cycle: CycleId,
        now: DateTime<Utc>,
        scored: &BTreeMap<String, Scored>,
        touched: &mut BTreeSet<String>,
        report: &mut CycleReport,
    ) {
        let held: Vec<_> = self.book.iter().cloned().collect();
        for position in held {
            let Some(data) = scored.get(&position.symbol) else {
                continue;
            };
            let decision = self
                .exits
                .evaluate_scored(&position, &data.score, data.snapshot.as_ref(), now);
            if !decision.should_exit() {
                continue;
            }

            touched.insert(position.symbol.clone());
            let reason = decision.reason_code();
            if self.gateway.close_position(&position.symbol) {
                self.book.close(&position.symbol);
                report.exited += 1;
                self.emit(
                    DecisionEvent::new(cycle, now, &position.symbol, DecisionKind::Exited, reason)
                        .with_evidence(decision.evidence),
                );
            } else {
                report.exit_failed += 1;
                self.emit(
                    DecisionEvent::new(cycle, now, &position.symbol, DecisionKind::ExitFailed, reason)
                        .with_evidence(decision.evidence),
                );
            }
        }
    }

    fn candidates(
        &self,
        cycle: CycleId,
        now: DateTime<Utc>,
        scored: &BTreeMap<String, Scored>,
        touched: &BTreeSet<String>,
        report: &mut CycleReport,
    ) -> Vec<Candidate> {
        let mut eligible = Vec::new();
        for symbol in &self.universe {
            if self.book.contains(symbol) || touched.contains(symbol) {
                continue;
            }
            let Some(data) = scored.get(symbol) else {
                continue;
            };
            let mut candidate = Candidate::new(side_for(data.snapshot.as_ref()), data.score.clone(), self.order_size);
            if let Some(snap) = &data.snapshot {
                if let Some(price) = snap.price() {
                    candidate = candidate.with_price(price);
                }
                if let Some(t) = snap.technicals() {
                    candidate = candidate.with_technicals(t);
                }
            }

            let evaluation = self.gate.evaluate(&candidate);
            if evaluation.is_eligible() {
                eligible.push(candidate);
            } else {
                report.gate_rejected += 1;
                self.emit(
                    DecisionEvent::new(cycle, now, symbol, DecisionKind::GateRejected, evaluation.verdict.code())
                        .with_evidence(evaluation.evidence),
                );
            }
        }
        eligible.sort_by(|a, b| b.value().total_cmp(&a.value()).then_with(|| a.symbol.cmp(&b.symbol)));
        eligible
    }

    fn held_marks(&self, scored: &BTreeMap<String, Scored>) -> BTreeMap<String, HeldMark> {
        self.book
            .iter()
            .map(|p| {
                let data = scored.get(&p.symbol);
                // no fresh signal: hold the position at its entry score
                let score = match data {
                    Some(d) if !d.score.defaulted => d.score.score,
                    _ => p.entry_score,
                };
                let mark = data.and_then(|d| d.snapshot.as_ref()).and_then(|s| s.price());
                (
                    p.symbol.clone(),
                    HeldMark {
                        score,
                        pnl_pct: p.pnl_pct(mark),
                    },
                )
            })
            .collect()
    }

    fn run_admissions(
        &mut self,
        cycle: CycleId,
        now: DateTime<Utc>,
        scored: &BTreeMap<String, Scored>,
        touched: &mut BTreeSet<String>,
        report: &mut CycleReport,
    ) {
        let candidates = self.candidates(cycle, now, scored, touched, report);
        let marks = self.held_marks(scored);

        for candidate in candidates {
            let plan = {
                let view = PortfolioView {
                    book: &self.book,
                    marks: &marks,
                    cooldowns: &self.cooldowns,
                    excluded: touched,
                    now,
                };
                self.controller.plan(&candidate, &view)
            };
            let outcome = self.controller.execute(
                plan,
                &candidate,
                &mut self.book,
                &mut self.cooldowns,
                self.gateway.as_ref(),
                now,
            );
            self.record_admission(cycle, now, &candidate, &outcome, touched, report);
        }
    }

    fn record_admission(
        &self,
        cycle: CycleId,
        now: DateTime<Utc>,
        candidate: &Candidate,
        outcome: &AdmissionOutcome,
        touched: &mut BTreeSet<String>,
        report: &mut CycleReport,
    ) {
        let mut evidence = candidate.score.evidence();
        if let Some(decision) = &outcome.decision {
            evidence.extend(decision.evidence());
        }
        let tier = outcome
            .decision
            .as_ref()
            .and_then(|d| d.tier)
            .map(|t| t.as_str());

        if let Some(victim) = &outcome.displaced {
            touched.insert(victim.symbol.clone());
            report.displaced += 1;
            let mut event = DecisionEvent::new(
                cycle,
                now,
                &victim.symbol,
                DecisionKind::Displaced,
                ExitReason::Displacement.code(),
            )
            .with_evidence(evidence.clone())
            .with_related(&candidate.symbol);
            if let Some(t) = tier {
                event = event.with_tier(t);
            }
            self.emit(event);
        }

        let (kind, victim) = match outcome.result {
            AdmissionResult::Admitted => {
                touched.insert(candidate.symbol.clone());
                report.admitted += 1;
                (DecisionKind::Admitted, outcome.displaced.as_ref().map(|p| p.symbol.as_str()))
            }
            AdmissionResult::Rejected(_) => {
                report.rejected += 1;
                let victim = outcome
                    .decision
                    .as_ref()
                    .and_then(|d| d.victim.as_ref())
                    .map(|v| v.symbol.as_str());
                (DecisionKind::AdmissionRejected, victim)
            }
        };
        let mut event = DecisionEvent::new(cycle, now, &candidate.symbol, kind, outcome.reason_code())
            .with_evidence(evidence);
        if let Some(v) = victim {
            event = event.with_related(v);
        }
        if let Some(t) = tier {
            event = event.with_tier(t);
        }
        self.emit(event);
    }

    /// Write state to disk. Failures are logged; the in-memory state stays
    /// authoritative and the next cycle retries.
    fn persist(&self, now: DateTime<Utc>) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        let cooldowns = store.save_cooldowns(&self.cooldowns, now);
        let positions = store.save_positions(&self.book, self.cycle, now);
        match cooldowns.and(positions) {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "state persistence failed");
                false
            }
        }
    }
}

/// Run cycles every `interval` until `max_cycles` is reached or `cancel` is
/// set. A config error halts the loop; everything else is per-cycle.
pub fn run_scheduled(
    runner: &mut CycleRunner,
    interval: Duration,
    max_cycles: Option<u64>,
    progress_cb: Option<&dyn Fn(&CycleReport)>,
    cancel: Option<&AtomicBool>,
) -> Result<u64, CycleError> {
    let mut completed = 0u64;
    loop {
        if cancel.is_some_and(|f| f.load(Ordering::Relaxed)) {
            info!(completed, "scheduler cancelled");
            break;
        }
        let started = Instant::now();
        let report = runner.run_cycle(Utc::now())?;
        completed += 1;
        if let Some(cb) = progress_cb {
            cb(&report);
        }
        if max_cycles.is_some_and(|max| completed >= max) {
            break;
        }

        // sleep out the rest of the interval in short slices so cancel stays responsive
        let deadline = started + interval;
        while Instant::now() < deadline {
            if cancel.is_some_and(|f| f.load(Ordering::Relaxed)) {
                break;
            }
            let left = deadline.saturating_duration_since(Instant::now());
            std::thread::sleep(left.min(Duration::from_millis(200)));
        }
    }
    Ok(completed)
}
