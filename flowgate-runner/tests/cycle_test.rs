//! End-to-end cycles: scripted snapshots, paper broker, in-memory event sink.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};

use flowgate_core::admission::AdmissionConfig;
use flowgate_core::domain::{FeatureSnapshot, Position, PositionBook, Regime, Side, FLOW_BIAS};
use flowgate_core::scoring::{FeatureWeight, WeightConfig};
use flowgate_core::EngineConfig;
use flowgate_runner::{
    read_events, run_scheduled, BrokerConfig, CycleRunner, DecisionKind, EventSink, FanoutSink, FeatureProvider,
    JsonlEventLog, MemorySink, PaperBroker, ProviderError, RetryingBroker, RuntimeConfig, StateStore,
};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 15, 30, 0).unwrap()
}

/// Snapshots set by the test. One feature with unit weight, so the
/// composite score equals the `signal` value.
#[derive(Default)]
struct Scripted {
    snapshots: Mutex<BTreeMap<String, FeatureSnapshot>>,
}

impl Scripted {
    fn set(&self, symbol: &str, signal: f64, price: f64) {
        let snap = FeatureSnapshot::new(symbol, 0.0, Regime::Neutral)
            .with("signal", signal)
            .with(FLOW_BIAS, 0.2)
            .with_price(price);
        self.snapshots.lock().unwrap().insert(symbol.to_string(), snap);
    }

    fn remove(&self, symbol: &str) {
        self.snapshots.lock().unwrap().remove(symbol);
    }
}

struct ScriptedHandle(Arc<Scripted>);

impl FeatureProvider for ScriptedHandle {
    fn name(&self) -> &str {
        "scripted"
    }

    fn snapshot(&self, symbol: &str) -> Result<Option<FeatureSnapshot>, ProviderError> {
        Ok(self.0.snapshots.lock().unwrap().get(symbol).cloned())
    }
}

fn engine(max_positions: usize) -> EngineConfig {
    let mut features = BTreeMap::new();
    features.insert("signal".to_string(), FeatureWeight::new(1.0, 0.5));
    EngineConfig {
        scoring: WeightConfig {
            version: "unit-1".to_string(),
            features,
            ..WeightConfig::default()
        },
        admission: AdmissionConfig {
            max_positions,
            hard_cap: max_positions,
            ..AdmissionConfig::default()
        },
        ..EngineConfig::default()
    }
}

fn runtime(universe: &[&str]) -> RuntimeConfig {
    RuntimeConfig {
        universe: universe.iter().map(|s| s.to_string()).collect(),
        order_size: 5.0,
        parallel_scoring: false,
        ..RuntimeConfig::default()
    }
}

fn fast_broker() -> BrokerConfig {
    BrokerConfig {
        timeout_ms: 500,
        max_attempts: 2,
        backoff_ms: 1,
    }
}

struct Harness {
    runner: CycleRunner,
    data: Arc<Scripted>,
    paper: Arc<PaperBroker>,
    sink: Arc<MemorySink>,
}

/// A runner whose book holds `holdings` as `(symbol, entry score)`, all
/// bought at 100 two hours before `t0`, with snapshots matching entry.
fn harness(engine: EngineConfig, universe: &[&str], holdings: &[(&str, f64)]) -> Harness {
    let data = Arc::new(Scripted::default());
    let mut book = PositionBook::new(engine.admission.max_positions);
    for (symbol, score) in holdings {
        book.open(Position::new(*symbol, Side::Long, *score, t0() - Duration::hours(2), 5.0, 100.0))
            .unwrap();
        data.set(symbol, *score, 100.1);
    }
    let paper = Arc::new(PaperBroker::new().with_holdings(holdings.iter().map(|(s, _)| (*s, Side::Long, 5.0))));
    let sink = Arc::new(MemorySink::new());
    let runner = CycleRunner::new(
        engine,
        &runtime(universe),
        Box::new(ScriptedHandle(data.clone())),
        Box::new(RetryingBroker::new(paper.clone(), &fast_broker())),
        sink.clone(),
    )
    .unwrap()
    .with_book(book);
    Harness {
        runner,
        data,
        paper,
        sink,
    }
}

#[test]
fn exit_frees_a_slot_that_the_same_cycle_fills() {
    let mut h = harness(engine(3), &["AAA", "BBB", "CCC", "NEW", "LOW"], &[("AAA", 4.0), ("BBB", 3.5), ("CCC", 3.4)]);
    h.data.set("AAA", 1.0, 100.0);
    h.data.set("NEW", 3.0, 50.0);
    h.data.set("LOW", 2.0, 50.0);

    let report = h.runner.run_cycle(t0()).unwrap();

    assert_eq!(report.exited, 1);
    assert_eq!(report.admitted, 1);
    assert_eq!(report.displaced, 0);
    assert_eq!(report.gate_rejected, 1);

    let exited = h.sink.of_kind(DecisionKind::Exited);
    assert_eq!(exited.len(), 1);
    assert_eq!(exited[0].symbol, "AAA");
    assert!(exited[0].reason.contains("signal_decay"));

    let admitted = h.sink.of_kind(DecisionKind::Admitted);
    assert_eq!(admitted[0].symbol, "NEW");
    assert_eq!(admitted[0].reason, "admitted");

    let gated = h.sink.of_kind(DecisionKind::GateRejected);
    assert_eq!(gated[0].symbol, "LOW");
    assert_eq!(gated[0].reason, "below_threshold");

    // the exited symbol is not re-considered in the same cycle
    assert!(!h.runner.book().contains("AAA"));
    assert!(h.runner.book().contains("NEW"));
    assert_eq!(h.runner.book().get("NEW").unwrap().cost_basis, 50.0);
    assert!(h.paper.holdings().contains_key("NEW"));
}

#[test]
fn elite_displacement_emits_paired_events_and_cools_down_victim() {
    let mut h = harness(engine(3), &["BBB", "CCC", "WEAK", "STAR"], &[("BBB", 3.5), ("CCC", 3.4), ("WEAK", 2.1)]);
    h.data.set("STAR", 4.8, 190.0);

    let report = h.runner.run_cycle(t0()).unwrap();
    assert_eq!(report.displaced, 1);
    assert_eq!(report.admitted, 1);
    assert_eq!(report.held, 3);

    let displaced = h.sink.of_kind(DecisionKind::Displaced);
    assert_eq!(displaced.len(), 1);
    assert_eq!(displaced[0].symbol, "WEAK");
    assert_eq!(displaced[0].reason, "displacement");
    assert_eq!(displaced[0].related.as_deref(), Some("STAR"));
    assert_eq!(displaced[0].tier.as_deref(), Some("elite"));
    assert_eq!(displaced[0].evidence["elite_threshold"], 3.6);
    assert_eq!(displaced[0].evidence["elite_score_floor"], 3.0);
    assert!(!displaced[0].evidence.contains_key("competitive_threshold"));

    let admitted = h.sink.of_kind(DecisionKind::Admitted);
    assert_eq!(admitted[0].symbol, "STAR");
    assert_eq!(admitted[0].reason, "displaced_and_admitted");
    assert_eq!(admitted[0].related.as_deref(), Some("WEAK"));
    assert!((admitted[0].evidence["score_delta"] - 2.7).abs() < 1e-9);
    assert_eq!(admitted[0].evidence["elite_loss_floor_pct"], -1.5);

    assert_eq!(h.runner.cooldowns().last_displaced("WEAK"), Some(t0()));
    let holdings = h.paper.holdings();
    assert!(holdings.contains_key("STAR"));
    assert!(!holdings.contains_key("WEAK"));

    // next cycle: the displaced symbol scores high but is still cooling down
    h.data.set("WEAK", 5.0, 100.0);
    let report = h.runner.run_cycle(t0() + Duration::minutes(5)).unwrap();
    assert_eq!(report.rejected, 1);
    let rejected = h.sink.of_kind(DecisionKind::AdmissionRejected);
    assert_eq!(rejected[0].symbol, "WEAK");
    assert_eq!(rejected[0].reason, "symbol_cooldown");
}

#[test]
fn failed_victim_close_leaves_book_untouched() {
    let mut h = harness(engine(3), &["BBB", "CCC", "WEAK", "STAR"], &[("BBB", 3.5), ("CCC", 3.4), ("WEAK", 2.1)]);
    h.data.set("STAR", 4.8, 190.0);
    h.paper.fail_close("WEAK");

    let report = h.runner.run_cycle(t0()).unwrap();
    assert_eq!(report.admitted, 0);
    assert_eq!(report.rejected, 1);

    let rejected = h.sink.of_kind(DecisionKind::AdmissionRejected);
    assert_eq!(rejected[0].symbol, "STAR");
    assert_eq!(rejected[0].reason, "displacement_failed");
    assert!(h.runner.book().contains("WEAK"));
    assert!(!h.runner.book().contains("STAR"));
    assert!(h.runner.cooldowns().is_empty());
    assert!(h.sink.of_kind(DecisionKind::Displaced).is_empty());
}

#[test]
fn failed_exit_keeps_position_and_reports_it() {
    let mut h = harness(engine(3), &["AAA"], &[("AAA", 4.0)]);
    h.data.set("AAA", 1.0, 100.0);
    h.paper.fail_close("AAA");

    let report = h.runner.run_cycle(t0()).unwrap();
    assert_eq!(report.exit_failed, 1);
    assert!(h.runner.book().contains("AAA"));
    assert_eq!(h.sink.of_kind(DecisionKind::ExitFailed)[0].symbol, "AAA");
}

#[test]
fn missing_snapshots_neither_exit_nor_admit() {
    let mut h = harness(engine(3), &["AAA", "GHOST"], &[("AAA", 4.0)]);
    h.data.remove("AAA");

    let report = h.runner.run_cycle(t0()).unwrap();
    assert_eq!(report.absent_snapshots, 2);
    assert_eq!(report.exited, 0);
    assert!(h.runner.book().contains("AAA"));

    let gated = h.sink.of_kind(DecisionKind::GateRejected);
    assert_eq!(gated.len(), 1);
    assert_eq!(gated[0].symbol, "GHOST");
    assert_eq!(gated[0].reason, "no_signal");
}

#[test]
fn higher_scores_claim_the_last_slot_first() {
    let mut h = harness(engine(2), &["AAA", "MID", "TOP"], &[("AAA", 3.5)]);
    h.data.set("MID", 3.1, 10.0);
    h.data.set("TOP", 3.3, 10.0);

    let report = h.runner.run_cycle(t0()).unwrap();
    assert_eq!(report.admitted, 1);
    assert!(h.runner.book().contains("TOP"));

    let rejected = h.sink.of_kind(DecisionKind::AdmissionRejected);
    assert_eq!(rejected[0].symbol, "MID");
    assert_eq!(rejected[0].reason, "no_displacement_candidate");
    // every tier was tried, so every threshold it compared is on record
    let evidence = &rejected[0].evidence;
    assert_eq!(evidence["elite_threshold"], 3.6);
    assert_eq!(evidence["competitive_threshold"], 4.0);
    assert_eq!(evidence["competitive_min_advantage"], 0.75);
    assert_eq!(evidence["force_threshold"], 4.5);
    assert_eq!(evidence["hard_cap"], 2.0);
    assert_eq!(evidence["legacy_min_advantage"], 0.5);
    assert_eq!(evidence["legacy_min_age_secs"], 1800.0);
}

#[test]
fn config_swap_rejects_invalid_and_applies_valid() {
    let mut h = harness(engine(3), &["AAA"], &[("AAA", 3.5)]);
    let before = h.runner.fingerprint().clone();

    let mut bad = engine(3);
    bad.admission.hard_cap = 9;
    assert!(h.runner.swap_config(bad).is_err());
    assert_eq!(h.runner.fingerprint(), &before);

    let mut good = engine(4);
    good.scoring.version = "unit-2".to_string();
    h.runner.swap_config(good).unwrap();
    assert_ne!(h.runner.fingerprint(), &before);
    assert_eq!(h.runner.book().capacity(), 4);

    let report = h.runner.run_cycle(t0()).unwrap();
    assert_eq!(report.weights_version, "unit-2");
    assert_eq!(report.config_fingerprint, h.runner.fingerprint().to_string());
}

#[test]
fn state_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness(engine(3), &["BBB", "CCC", "WEAK", "STAR"], &[("BBB", 3.5), ("CCC", 3.4), ("WEAK", 2.1)]);
    h.runner = h.runner.with_store(StateStore::new(dir.path())).unwrap();
    // the store was empty, so re-seed the book
    let mut book = PositionBook::new(3);
    for (s, score) in [("BBB", 3.5), ("CCC", 3.4), ("WEAK", 2.1)] {
        book.open(Position::new(s, Side::Long, score, t0() - Duration::hours(2), 5.0, 100.0))
            .unwrap();
    }
    h.runner = h.runner.with_book(book);
    h.data.set("STAR", 4.8, 190.0);

    let report = h.runner.run_cycle(t0()).unwrap();
    assert!(report.persisted);
    assert_eq!(report.cycle.0, 1);

    let restored = CycleRunner::new(
        engine(3),
        &runtime(&["BBB"]),
        Box::new(ScriptedHandle(h.data.clone())),
        Box::new(RetryingBroker::new(h.paper.clone(), &fast_broker())),
        Arc::new(MemorySink::new()),
    )
    .unwrap()
    .with_store(StateStore::new(dir.path()))
    .unwrap();

    assert!(restored.book().contains("STAR"));
    assert!(!restored.book().contains("WEAK"));
    assert_eq!(restored.cooldowns().last_displaced("WEAK"), Some(t0()));
    assert_eq!(restored.last_cycle().0, 1);
}

#[test]
fn events_reach_the_jsonl_log_through_fanout() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.jsonl");
    let memory = Arc::new(MemorySink::new());
    let log: Arc<dyn EventSink> = Arc::new(JsonlEventLog::open(&path).unwrap());
    let sink = Arc::new(FanoutSink::new().with(memory.clone()).with(log));

    let data = Arc::new(Scripted::default());
    data.set("NEW", 3.0, 10.0);
    let mut runner = CycleRunner::new(
        engine(2),
        &runtime(&["NEW"]),
        Box::new(ScriptedHandle(data)),
        Box::new(RetryingBroker::new(Arc::new(PaperBroker::new()), &fast_broker())),
        sink,
    )
    .unwrap();

    runner.run_cycle(t0()).unwrap();
    let logged = read_events(&path).unwrap();
    let in_memory = memory.events();
    assert_eq!(logged.len(), in_memory.len());
    assert_eq!(logged[0].symbol, in_memory[0].symbol);
    assert_eq!(logged[0].kind, DecisionKind::Admitted);
    assert_eq!(logged[0].reason, "admitted");
}

#[test]
fn scheduler_stops_after_max_cycles_or_on_cancel() {
    let mut h = harness(engine(2), &["AAA"], &[("AAA", 3.5)]);
    let seen = Mutex::new(Vec::new());
    let cb = |r: &flowgate_runner::CycleReport| seen.lock().unwrap().push(r.cycle.0);

    let ran = run_scheduled(&mut h.runner, StdDuration::from_millis(1), Some(3), Some(&cb), None).unwrap();
    assert_eq!(ran, 3);
    assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);

    let cancel = AtomicBool::new(true);
    let ran = run_scheduled(&mut h.runner, StdDuration::from_millis(1), None, None, Some(&cancel)).unwrap();
    assert_eq!(ran, 0);
}
