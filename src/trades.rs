//! Trade history per symbol
//!
//! Snapshots replace the history; updates append unseen trade ids and the
//! sequence is kept newest-first.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::parser::{MessageType, TradeRecord};

/// Materialized trade history handed to listeners
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeHistoryState {
    pub symbol: String,
    /// Newest first
    pub trades: Vec<TradeRecord>,
}

/// Trade histories for all subscribed symbols
#[derive(Debug)]
pub struct TradeHistory {
    histories: HashMap<String, Vec<TradeRecord>>,
    limit: usize,
}

impl TradeHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            histories: HashMap::new(),
            limit,
        }
    }

    /// Apply the records a frame carried for one symbol
    pub fn apply(
        &mut self,
        message_type: MessageType,
        symbol: &str,
        records: &[TradeRecord],
    ) -> TradeHistoryState {
        let history = self.histories.entry(symbol.to_string()).or_default();

        match message_type {
            MessageType::Snapshot => {
                history.clear();
                history.extend_from_slice(records);
            }
            MessageType::Update => {
                let mut seen: HashSet<u64> = history.iter().map(|t| t.trade_id).collect();
                for record in records {
                    if seen.insert(record.trade_id) {
                        history.push(record.clone());
                    }
                }
            }
        }

        history.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        history.truncate(self.limit);

        TradeHistoryState {
            symbol: symbol.to_string(),
            trades: history.clone(),
        }
    }

    pub fn get(&self, symbol: &str) -> Option<TradeHistoryState> {
        self.histories.get(symbol).map(|trades| TradeHistoryState {
            symbol: symbol.to_string(),
            trades: trades.clone(),
        })
    }

    pub fn remove(&mut self, symbol: &str) -> bool {
        self.histories.remove(symbol).is_some()
    }

    pub fn clear(&mut self) {
        self.histories.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{OrderType, TradeSide};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn trade(trade_id: u64, second: u32) -> TradeRecord {
        TradeRecord {
            symbol: "BTC/USD".to_string(),
            side: TradeSide::Buy,
            price: dec!(100),
            quantity: dec!(1),
            ord_type: OrderType::Market,
            trade_id,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, second).unwrap(),
        }
    }

    #[test]
    fn test_update_skips_known_ids_and_sorts_newest_first() {
        let mut history = TradeHistory::new(100);
        history.apply(MessageType::Snapshot, "BTC/USD", &[trade(1, 1)]);

        let state = history.apply(MessageType::Update, "BTC/USD", &[trade(1, 1), trade(2, 2)]);
        let ids: Vec<u64> = state.trades.iter().map(|t| t.trade_id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn test_duplicate_ids_within_one_update() {
        let mut history = TradeHistory::new(100);
        let state = history.apply(MessageType::Update, "BTC/USD", &[trade(5, 1), trade(5, 1)]);
        assert_eq!(state.trades.len(), 1);
    }

    #[test]
    fn test_snapshot_replaces_history() {
        let mut history = TradeHistory::new(100);
        history.apply(MessageType::Snapshot, "BTC/USD", &[trade(1, 1), trade(2, 2)]);

        let state = history.apply(MessageType::Snapshot, "BTC/USD", &[trade(3, 3)]);
        assert_eq!(state.trades.len(), 1);
        assert_eq!(state.trades[0].trade_id, 3);
    }

    #[test]
    fn test_history_is_truncated_to_newest() {
        let mut history = TradeHistory::new(2);
        let state = history.apply(
            MessageType::Snapshot,
            "BTC/USD",
            &[trade(1, 1), trade(2, 2), trade(3, 3)],
        );
        let ids: Vec<u64> = state.trades.iter().map(|t| t.trade_id).collect();
        assert_eq!(ids, vec![3, 2]);
        assert_eq!(history.get("BTC/USD").unwrap().trades.len(), 2);
    }
}
