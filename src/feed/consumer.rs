//! Per-symbol consumer adapters
//!
//! A consumer binds one symbol of one channel kind to the shared service:
//! it registers interest, filters the fan-out by symbol and keeps the most
//! recent materialized value. Dropping it releases both.

use parking_lot::Mutex;
use std::sync::Arc;

use super::service::{ConnectionStatus, FeedService, ListenerHandle};
use super::FeedEvent;
use crate::orderbook::OrderBookState;
use crate::parser::{ChannelKind, TickerSnapshot};
use crate::trades::TradeHistoryState;

/// Value a consumer materializes from the events of its channel kind
pub trait Materialized: Clone + Send + Sync + 'static {
    const CHANNEL: ChannelKind;

    fn from_event(event: &FeedEvent) -> Option<&Self>;

    /// Value the service already holds for the symbol
    fn cached(service: &FeedService, symbol: &str) -> Option<Self>;
}

impl Materialized for OrderBookState {
    const CHANNEL: ChannelKind = ChannelKind::Book;

    fn from_event(event: &FeedEvent) -> Option<&Self> {
        match event {
            FeedEvent::Book(book) => Some(book),
            _ => None,
        }
    }

    fn cached(service: &FeedService, symbol: &str) -> Option<Self> {
        service.book(symbol)
    }
}

impl Materialized for TickerSnapshot {
    const CHANNEL: ChannelKind = ChannelKind::Ticker;

    fn from_event(event: &FeedEvent) -> Option<&Self> {
        match event {
            FeedEvent::Ticker(ticker) => Some(ticker),
            _ => None,
        }
    }

    fn cached(service: &FeedService, symbol: &str) -> Option<Self> {
        service.ticker(symbol)
    }
}

impl Materialized for TradeHistoryState {
    const CHANNEL: ChannelKind = ChannelKind::Trade;

    fn from_event(event: &FeedEvent) -> Option<&Self> {
        match event {
            FeedEvent::Trade(history) => Some(history),
            _ => None,
        }
    }

    fn cached(service: &FeedService, symbol: &str) -> Option<Self> {
        service.trades(symbol)
    }
}

pub type BookConsumer = Consumer<OrderBookState>;
pub type TickerConsumer = Consumer<TickerSnapshot>;
pub type TradeConsumer = Consumer<TradeHistoryState>;

/// Mounted view of one symbol
pub struct Consumer<T: Materialized> {
    service: Arc<FeedService>,
    symbol: String,
    latest: Arc<Mutex<Option<T>>>,
    listener: Option<ListenerHandle>,
    /// Service epoch the interest was taken in
    epoch: u64,
}

impl<T: Materialized> Consumer<T> {
    pub fn new(service: Arc<FeedService>, symbol: &str) -> Self {
        let mut consumer = Self {
            service,
            symbol: String::new(),
            latest: Arc::new(Mutex::new(None)),
            listener: None,
            epoch: 0,
        };
        consumer.mount(symbol);
        consumer
    }

    fn mount(&mut self, symbol: &str) {
        self.symbol = symbol.to_string();
        // A fresh slot so a late event for the old symbol cannot land here
        self.latest = Arc::new(Mutex::new(T::cached(&self.service, symbol)));

        let slot = Arc::clone(&self.latest);
        let wanted = self.symbol.clone();
        self.listener = Some(self.service.add_listener(T::CHANNEL, move |event: &FeedEvent| {
            if event.symbol() != wanted {
                return;
            }
            if let Some(value) = T::from_event(event) {
                *slot.lock() = Some(value.clone());
            }
        }));

        self.epoch = self.service.acquire(T::CHANNEL, symbol);
    }

    fn unmount(&mut self) {
        self.listener.take();
        self.service.release(T::CHANNEL, &self.symbol, self.epoch);
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Most recent value for the symbol, `None` before the first delivery
    pub fn latest(&self) -> Option<T> {
        self.latest.lock().clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.service.status()
    }

    pub fn error(&self) -> Option<String> {
        self.service.last_error()
    }

    /// Re-point the consumer at another symbol
    pub fn set_symbol(&mut self, symbol: &str) {
        if symbol == self.symbol {
            return;
        }
        self.unmount();
        self.mount(symbol);
    }
}

impl<T: Materialized> Drop for Consumer<T> {
    fn drop(&mut self) {
        self.unmount();
    }
}
