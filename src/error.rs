//! Error types for the feed client

use thiserror::Error;

/// Feed client errors
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("WebSocket connection error: {0}")]
    WebSocketConnection(String),

    #[error("WebSocket message error: {0}")]
    WebSocketMessage(String),

    #[error("Failed to parse message: {0}")]
    ParseError(String),

    #[error("REST API error: {0}")]
    RestApiError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Metrics error: {0}")]
    MetricsError(String),

    #[error("Subscription to {channel} failed: {reason}")]
    SubscriptionFailed { channel: String, reason: String },

    #[error("Connection timeout")]
    ConnectionTimeout,

    #[error("No message received for {0} seconds")]
    IdleTimeout(u64),

    #[error("Max reconnection attempts exceeded")]
    MaxReconnectAttemptsExceeded,
}

impl From<tokio_tungstenite::tungstenite::Error> for FeedError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        FeedError::WebSocketConnection(err.to_string())
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::ParseError(err.to_string())
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        FeedError::RestApiError(err.to_string())
    }
}

impl From<prometheus::Error> for FeedError {
    fn from(err: prometheus::Error) -> Self {
        FeedError::MetricsError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FeedError>;
