//! FlowGate Runner — cycle orchestration around the `flowgate-core` engine.
//!
//! This crate provides:
//! - Runtime configuration (universe, cadence, snapshot source, broker limits)
//! - Feature providers: JSON snapshot files and a seeded synthetic generator
//! - Broker adapter with per-call timeouts and bounded retries, plus a paper broker
//! - Decision event sinks (tracing, JSONL, memory) and CSV export
//! - Atomic JSON persistence for cooldowns and positions
//! - The cycle runner and its scheduling loop

pub mod broker;
pub mod config;
pub mod cycle;
pub mod events;
pub mod provider;
pub mod store;

pub use broker::{BrokerError, BrokerGateway, PaperBroker, PaperFill, RetryingBroker};
pub use config::{AppConfig, BrokerConfig, RuntimeConfig, SnapshotSource};
pub use cycle::{run_scheduled, side_for, CycleError, CycleReport, CycleRunner};
pub use events::{
    export_events_csv, read_events, DecisionEvent, DecisionKind, EventSink, FanoutSink, JsonlEventLog,
    MemorySink, TracingSink,
};
pub use provider::{
    provider_for, BestEffortProvider, FeatureProvider, JsonSnapshotProvider, ProviderError, SnapshotFile,
    SyntheticProvider,
};
pub use store::{RestoredBook, StateStore, StoreError};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn config_types_are_send_sync() {
        assert_send::<AppConfig>();
        assert_sync::<AppConfig>();
        assert_send::<RuntimeConfig>();
        assert_sync::<RuntimeConfig>();
    }

    #[test]
    fn providers_are_send_sync() {
        assert_send::<SyntheticProvider>();
        assert_sync::<SyntheticProvider>();
        assert_send::<JsonSnapshotProvider>();
        assert_sync::<JsonSnapshotProvider>();
        assert_send::<BestEffortProvider>();
        assert_sync::<BestEffortProvider>();
    }

    #[test]
    fn brokers_are_send_sync() {
        assert_send::<PaperBroker>();
        assert_sync::<PaperBroker>();
        assert_send::<RetryingBroker>();
        assert_sync::<RetryingBroker>();
    }

    #[test]
    fn event_types_are_send_sync() {
        assert_send::<DecisionEvent>();
        assert_sync::<DecisionEvent>();
        assert_send::<JsonlEventLog>();
        assert_sync::<JsonlEventLog>();
        assert_send::<MemorySink>();
        assert_sync::<MemorySink>();
    }

    #[test]
    fn cycle_report_is_send_sync() {
        assert_send::<CycleReport>();
        assert_sync::<CycleReport>();
    }
}
