//! Shared feed: one connection, many consumers

mod consumer;
mod events;
mod fanout;
mod registry;
mod service;

pub use consumer::{BookConsumer, Consumer, Materialized, TickerConsumer, TradeConsumer};
pub use events::FeedEvent;
pub use fanout::{Listener, ListenerId};
pub use registry::{Acquire, Release, SubscriptionRegistry};
pub use service::{
    Command, CommandReceiver, ConnectionStatus, FeedService, ListenerHandle, PageLifecycle,
    ABNORMAL_CLOSURE, NORMAL_CLOSURE,
};
