//! Order book module
//!
//! Reconstructs full order book state from feed snapshots and deltas.

mod book;
mod manager;

pub use book::OrderBook;
pub use manager::OrderBookManager;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Side of the order book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Bid,
    Ask,
}

/// A single level in the order book
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    pub price: Decimal,
    #[serde(rename = "qty")]
    pub quantity: Decimal,
}

impl Level {
    pub fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity }
    }
}

/// Materialized order book handed to listeners
///
/// Always the complete book, never a delta. Bids are best-first
/// (descending), asks ascending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookState {
    pub symbol: String,
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
    pub checksum: u32,
    pub timestamp: Option<DateTime<Utc>>,
}

impl OrderBookState {
    pub fn best_bid(&self) -> Option<&Level> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&Level> {
        self.asks.first()
    }

    /// Get mid price
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid.price + ask.price) / Decimal::from(2)),
            _ => None,
        }
    }

    /// Absolute spread between best ask and best bid
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask.price - bid.price),
            _ => None,
        }
    }

    /// Spread as a percentage of the best bid
    pub fn spread_pct(&self) -> Option<Decimal> {
        let bid = self.best_bid()?.price;
        if bid.is_zero() {
            return None;
        }
        Some(self.spread()? / bid * Decimal::from(100))
    }
}
