//! Domain types for FlowGate

pub mod book;
pub mod candidate;
pub mod features;
pub mod ids;
pub mod position;

pub use book::{BookError, PositionBook};
pub use candidate::{Candidate, Technicals};
pub use features::{FeatureSnapshot, Regime, FLOW_BIAS, MOVING_AVERAGE, RESISTANCE, TOXICITY};
pub use ids::{ConfigFingerprint, CycleId};
pub use position::{Position, Side};

/// Symbol type alias
pub type Symbol = String;
