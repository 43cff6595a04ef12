//! Position book — the fixed-capacity set of held positions.
//!
//! The capacity limit is enforced at insertion: `open` refuses to grow the
//! book past `capacity`, so `len() <= capacity` holds after every mutation
//! that goes through this type.

use super::position::Position;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BookError {
    #[error("position book is at capacity ({capacity})")]
    AtCapacity { capacity: usize },

    #[error("symbol '{0}' is already held")]
    AlreadyHeld(String),

    #[error("invalid quantity {quantity} for '{symbol}'")]
    InvalidQuantity { symbol: String, quantity: f64 },
}

/// Held positions keyed by symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionBook {
    capacity: usize,
    positions: BTreeMap<String, Position>,
}

impl PositionBook {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            positions: BTreeMap::new(),
        }
    }

    /// Rebuild a book from persisted positions.
    ///
    /// Positions beyond the capacity are not dropped: the book simply reports
    /// itself full until exits bring it back under the limit.
    pub fn from_positions(capacity: usize, positions: impl IntoIterator<Item = Position>) -> Self {
        let positions = positions
            .into_iter()
            .map(|p| (p.symbol.clone(), p))
            .collect();
        Self {
            capacity,
            positions,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.positions.len() >= self.capacity
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    pub fn get(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn symbols(&self) -> Vec<String> {
        self.positions.keys().cloned().collect()
    }

    /// Insert a newly opened position.
    pub fn open(&mut self, position: Position) -> Result<(), BookError> {
        if !(position.quantity.is_finite() && position.quantity > 0.0) {
            return Err(BookError::InvalidQuantity {
                symbol: position.symbol.clone(),
                quantity: position.quantity,
            });
        }
        if self.positions.contains_key(&position.symbol) {
            return Err(BookError::AlreadyHeld(position.symbol));
        }
        if self.is_full() {
            return Err(BookError::AtCapacity {
                capacity: self.capacity,
            });
        }
        self.positions.insert(position.symbol.clone(), position);
        Ok(())
    }

    /// Remove a fully closed position.
    pub fn close(&mut self, symbol: &str) -> Option<Position> {
        self.positions.remove(symbol)
    }
}
