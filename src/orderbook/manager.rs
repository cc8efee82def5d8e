//! Order book manager
//!
//! Manages order books for every subscribed symbol.

use std::collections::HashMap;

use super::{OrderBook, OrderBookState};
use crate::parser::{BookData, MessageType};

/// Manages order books for multiple symbols
#[derive(Debug, Default)]
pub struct OrderBookManager {
    books: HashMap<String, OrderBook>,
    max_depth: Option<usize>,
}

impl OrderBookManager {
    /// Create a new order book manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with custom depth
    pub fn with_depth(max_depth: Option<usize>) -> Self {
        Self {
            books: HashMap::new(),
            max_depth,
        }
    }

    /// Apply one book entry and return the full book it produced
    ///
    /// An update for a symbol without a snapshot is ignored and returns None:
    /// reconstruction needs a snapshot to anchor on.
    pub fn apply(&mut self, message_type: MessageType, data: &BookData) -> Option<OrderBookState> {
        match message_type {
            MessageType::Snapshot => {
                let book = OrderBook::from_snapshot(data, self.max_depth);
                let state = book.state();
                self.books.insert(data.symbol.clone(), book);
                Some(state)
            }
            MessageType::Update => {
                let book = self.books.get_mut(&data.symbol)?;
                book.apply_update(data);
                Some(book.state())
            }
        }
    }

    /// Discard the book for a symbol
    pub fn remove(&mut self, symbol: &str) -> bool {
        self.books.remove(symbol).is_some()
    }

    /// Discard every book
    pub fn clear(&mut self) {
        self.books.clear();
    }

    /// Get the state of a specific book
    pub fn get_state(&self, symbol: &str) -> Option<OrderBookState> {
        self.books.get(symbol).map(|book| book.state())
    }

    /// Get list of symbols being tracked
    pub fn symbols(&self) -> Vec<String> {
        self.books.keys().cloned().collect()
    }

    /// Check if a symbol exists
    pub fn has_symbol(&self, symbol: &str) -> bool {
        self.books.contains_key(symbol)
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }
}
