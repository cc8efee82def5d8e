//! Events delivered to listeners

use crate::orderbook::OrderBookState;
use crate::parser::{ChannelKind, TickerSnapshot};
use crate::trades::TradeHistoryState;

/// Materialized value for one symbol, produced by an inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Ticker(TickerSnapshot),
    Book(OrderBookState),
    Trade(TradeHistoryState),
}

impl FeedEvent {
    pub fn kind(&self) -> ChannelKind {
        match self {
            FeedEvent::Ticker(_) => ChannelKind::Ticker,
            FeedEvent::Book(_) => ChannelKind::Book,
            FeedEvent::Trade(_) => ChannelKind::Trade,
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            FeedEvent::Ticker(ticker) => &ticker.symbol,
            FeedEvent::Book(book) => &book.symbol,
            FeedEvent::Trade(history) => &history.symbol,
        }
    }
}
