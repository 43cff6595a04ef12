use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction of a held position or candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1.0 for long, -1.0 for short.
    pub fn sign(&self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }
}

/// A held position and the entry metadata the exit and admission paths need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    /// Composite score at the time the position was opened.
    pub entry_score: f64,
    pub entry_time: DateTime<Utc>,
    pub quantity: f64,
    /// Average entry price per unit.
    pub cost_basis: f64,
}

impl Position {
    pub fn new(
        symbol: impl Into<String>,
        side: Side,
        entry_score: f64,
        entry_time: DateTime<Utc>,
        quantity: f64,
        cost_basis: f64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            entry_score,
            entry_time,
            quantity,
            cost_basis,
        }
    }

    /// Seconds held as of `now`, never negative.
    pub fn age_secs(&self, now: DateTime<Utc>) -> f64 {
        let age = now.signed_duration_since(self.entry_time);
        (age.num_milliseconds() as f64 / 1000.0).max(0.0)
    }

    /// Side-adjusted PnL in percentage points (0.2 means +0.2%).
    ///
    /// Without a usable mark, or with no cost basis, the position is treated
    /// as flat.
    pub fn pnl_pct(&self, mark: Option<f64>) -> f64 {
        match mark {
            Some(price) if price.is_finite() && price > 0.0 && self.cost_basis > 0.0 => {
                self.side.sign() * (price - self.cost_basis) / self.cost_basis * 100.0
            }
            _ => 0.0,
        }
    }

    pub fn unrealized_pnl(&self, mark: f64) -> f64 {
        self.side.sign() * self.quantity * (mark - self.cost_basis)
    }
}
