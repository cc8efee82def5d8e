//! Core order book implementation
//!
//! Uses BTreeMap keyed by exact decimal price so presentation sorting is lossless.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::cmp::Reverse;
use std::collections::BTreeMap;

use super::{Level, OrderBookState, Side};
use crate::parser::{BookData, PriceLevel};

/// Order book for a single symbol
#[derive(Debug)]
pub struct OrderBook {
    symbol: String,
    /// Bids sorted by price descending (highest first)
    bids: BTreeMap<Reverse<Decimal>, Decimal>,
    /// Asks sorted by price ascending (lowest first)
    asks: BTreeMap<Decimal, Decimal>,
    /// Opaque checksum supplied by the feed
    checksum: u32,
    /// Maximum depth levels to maintain, unbounded when None
    max_depth: Option<usize>,
    /// Timestamp of last update
    last_update_time: Option<DateTime<Utc>>,
}

impl OrderBook {
    /// Create a new empty order book
    pub fn new(symbol: &str, max_depth: Option<usize>) -> Self {
        Self {
            symbol: symbol.to_string(),
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            checksum: 0,
            max_depth,
            last_update_time: None,
        }
    }

    /// Build a book from a snapshot entry
    pub fn from_snapshot(snapshot: &BookData, max_depth: Option<usize>) -> Self {
        let mut book = Self::new(&snapshot.symbol, max_depth);
        book.init_snapshot(snapshot);
        book
    }

    /// Replace all state with a snapshot
    ///
    /// Duplicate prices in the input are last-write-wins; a zero quantity
    /// leaves the level absent.
    pub fn init_snapshot(&mut self, snapshot: &BookData) {
        self.bids.clear();
        self.asks.clear();

        for level in &snapshot.bids {
            self.update_side(Side::Bid, level);
        }

        for level in &snapshot.asks {
            self.update_side(Side::Ask, level);
        }

        self.checksum = snapshot.checksum.unwrap_or(0);
        self.last_update_time = snapshot.timestamp;
        self.trim_depth();
    }

    /// Apply a delta update
    pub fn apply_update(&mut self, update: &BookData) {
        for level in &update.bids {
            self.update_side(Side::Bid, level);
        }

        for level in &update.asks {
            self.update_side(Side::Ask, level);
        }

        if let Some(checksum) = update.checksum {
            self.checksum = checksum;
        }
        if update.timestamp.is_some() {
            self.last_update_time = update.timestamp;
        }
        self.trim_depth();
    }

    /// Update a single price level
    fn update_side(&mut self, side: Side, level: &PriceLevel) {
        match side {
            Side::Bid => {
                if level.quantity.is_zero() {
                    self.bids.remove(&Reverse(level.price));
                } else {
                    self.bids.insert(Reverse(level.price), level.quantity);
                }
            }
            Side::Ask => {
                if level.quantity.is_zero() {
                    self.asks.remove(&level.price);
                } else {
                    self.asks.insert(level.price, level.quantity);
                }
            }
        }
    }

    /// Trim the book to max depth, dropping the worst levels
    fn trim_depth(&mut self) {
        let Some(max_depth) = self.max_depth else {
            return;
        };
        while self.bids.len() > max_depth {
            self.bids.pop_last();
        }
        while self.asks.len() > max_depth {
            self.asks.pop_last();
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Get best bid price
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first_key_value().map(|(Reverse(p), _)| *p)
    }

    /// Get best ask price
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first_key_value().map(|(p, _)| *p)
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    pub fn bid_levels(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_levels(&self) -> usize {
        self.asks.len()
    }

    /// Get current state for listeners
    pub fn state(&self) -> OrderBookState {
        OrderBookState {
            symbol: self.symbol.clone(),
            bids: self
                .bids
                .iter()
                .map(|(Reverse(p), q)| Level::new(*p, *q))
                .collect(),
            asks: self.asks.iter().map(|(p, q)| Level::new(*p, *q)).collect(),
            checksum: self.checksum,
            timestamp: self.last_update_time,
        }
    }
}
