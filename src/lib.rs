//! Kraken Book Sync - WebSocket v2 Feed Client Library
//!
//! This crate keeps a single connection to the Kraken WebSocket v2 feed,
//! multiplexes ticker, book and trade subscriptions across many consumers,
//! and reconstructs full order books from snapshot and incremental updates.

use std::sync::Arc;

pub mod config;
pub mod error;
pub mod feed;
pub mod instruments;
pub mod metrics;
pub mod orderbook;
pub mod parser;
pub mod ticker;
pub mod trades;
pub mod websocket;

pub use config::Config;
pub use error::{FeedError, Result};
pub use feed::{
    BookConsumer, Command, ConnectionStatus, Consumer, FeedEvent, FeedService, ListenerHandle,
    PageLifecycle, TickerConsumer, TradeConsumer,
};
pub use instruments::{InstrumentClient, TradingPair};
pub use metrics::FeedMetrics;
pub use orderbook::{Level, OrderBook, OrderBookManager, OrderBookState};
pub use parser::{ChannelKind, ControlFrame, ParsedMessage, TickerSnapshot, TradeRecord};
pub use trades::TradeHistoryState;
pub use websocket::WebSocketManager;

/// Application state shared across components
pub struct AppState {
    pub service: Arc<FeedService>,
    pub config: Arc<Config>,
}
