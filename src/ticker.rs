//! Ticker cache
//!
//! Snapshots replace the cached ticker; updates merge field by field.

use std::collections::HashMap;

use crate::parser::{MessageType, TickerSnapshot};

impl TickerSnapshot {
    /// Overwrite fields present in `update`, keep the rest
    pub fn merge(&mut self, update: &TickerSnapshot) {
        fn take(field: &mut Option<rust_decimal::Decimal>, incoming: Option<rust_decimal::Decimal>) {
            if incoming.is_some() {
                *field = incoming;
            }
        }

        take(&mut self.bid, update.bid);
        take(&mut self.bid_qty, update.bid_qty);
        take(&mut self.ask, update.ask);
        take(&mut self.ask_qty, update.ask_qty);
        take(&mut self.last, update.last);
        take(&mut self.volume, update.volume);
        take(&mut self.vwap, update.vwap);
        take(&mut self.low, update.low);
        take(&mut self.high, update.high);
        take(&mut self.change, update.change);
        take(&mut self.change_pct, update.change_pct);
    }
}

/// Latest ticker per symbol
#[derive(Debug, Default)]
pub struct TickerCache {
    tickers: HashMap<String, TickerSnapshot>,
}

impl TickerCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one ticker entry and return the materialized ticker
    ///
    /// An update with no prior value is stored as-is.
    pub fn apply(&mut self, message_type: MessageType, data: &TickerSnapshot) -> TickerSnapshot {
        if message_type == MessageType::Update {
            if let Some(current) = self.tickers.get_mut(&data.symbol) {
                current.merge(data);
                return current.clone();
            }
        }
        self.tickers.insert(data.symbol.clone(), data.clone());
        data.clone()
    }

    pub fn get(&self, symbol: &str) -> Option<&TickerSnapshot> {
        self.tickers.get(symbol)
    }

    pub fn remove(&mut self, symbol: &str) -> bool {
        self.tickers.remove(symbol).is_some()
    }

    pub fn clear(&mut self) {
        self.tickers.clear();
    }
}
