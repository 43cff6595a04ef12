//! FlowGate Core — composite scoring, entry gate, admission/displacement,
//! cooldowns and exit evaluation.
//!
//! This crate is the pure decision engine:
//! - Domain types (feature snapshots, positions, the position book, candidates)
//! - Composite scorer with neutral defaults, toxicity penalty and freshness decay
//! - Entry gate with hard blocks, per-symbol thresholds and technical filters
//! - Admission controller with ordered displacement tiers
//! - Cooldown registry
//! - Exit evaluator with composite reasons
//!
//! Nothing here performs I/O beyond reading a config file; broker and data
//! access are traits implemented by `flowgate-runner`.

pub mod admission;
pub mod config;
pub mod cooldown;
pub mod domain;
pub mod exit;
pub mod gate;
pub mod scoring;

pub use config::{ConfigError, EngineConfig};
