//! WebSocket transport for the Kraken v2 feed

mod client;
mod manager;

pub use client::{Incoming, WebSocketClient};
pub use manager::WebSocketManager;
