use serde::{Deserialize, Serialize};

use super::position::Side;
use crate::scoring::CompositeScore;

/// Optional technical context for the secondary entry filters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Technicals {
    pub moving_average: Option<f64>,
    /// Nearest known resistance level above the current price.
    pub resistance: Option<f64>,
}

/// A scored trade candidate. Lives for one cycle's decision pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub symbol: String,
    pub side: Side,
    pub score: CompositeScore,
    /// Proposed quantity to open.
    pub size: f64,
    /// Reference price at decision time, used as the cost basis on open.
    pub price: Option<f64>,
    #[serde(default)]
    pub technicals: Option<Technicals>,
}

impl Candidate {
    pub fn new(side: Side, score: CompositeScore, size: f64) -> Self {
        Self {
            symbol: score.symbol.clone(),
            side,
            score,
            size,
            price: None,
            technicals: None,
        }
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_technicals(mut self, technicals: Technicals) -> Self {
        self.technicals = Some(technicals);
        self
    }

    /// Composite score value.
    pub fn value(&self) -> f64 {
        self.score.score
    }
}
