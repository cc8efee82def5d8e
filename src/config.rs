//! Configuration module for the feed client

use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{FeedError, Result};

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Trading pairs the binary mounts consumers for (e.g., ["BTC/USD", "ETH/USD"])
    pub symbols: Vec<String>,

    /// WebSocket endpoint for the public feed
    pub ws_endpoint: String,

    /// REST endpoint for instrument metadata
    pub rest_endpoint: String,

    /// Book depth requested on subscribe; books are truncated to it when set
    pub book_depth: Option<u32>,

    /// Explicit `snapshot` flag for subscribe requests (feed default when unset)
    pub request_snapshot: Option<bool>,

    /// Reconnection settings
    pub reconnect_delay_ms: u64,
    /// 0 means unlimited
    pub max_reconnect_attempts: u32,

    /// Connection establishment timeout in seconds
    pub connect_timeout_secs: u64,

    /// A connection with no inbound frame for this long is considered dead
    pub idle_timeout_secs: u64,

    /// Newest trades retained per symbol
    pub trade_history_limit: usize,

    /// Port for the health and metrics server
    pub health_port: u16,

    /// Status logging interval in seconds
    pub status_log_interval_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let symbols: Vec<String> = env::var("SYMBOLS")
            .unwrap_or_else(|_| defaults.symbols.join(","))
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();

        if symbols.is_empty() {
            return Err(FeedError::ConfigError("SYMBOLS must name at least one pair".to_string()));
        }

        Ok(Self {
            symbols,
            ws_endpoint: env::var("KRAKEN_WS_URL").unwrap_or(defaults.ws_endpoint),
            rest_endpoint: env::var("KRAKEN_API_PAIRS").unwrap_or(defaults.rest_endpoint),
            book_depth: env_opt("BOOK_DEPTH"),
            request_snapshot: env_opt("REQUEST_SNAPSHOT"),
            reconnect_delay_ms: env_or("RECONNECT_DELAY_MS", defaults.reconnect_delay_ms),
            max_reconnect_attempts: env_or("MAX_RECONNECT_ATTEMPTS", defaults.max_reconnect_attempts),
            connect_timeout_secs: env_or("CONNECT_TIMEOUT_SECS", defaults.connect_timeout_secs),
            idle_timeout_secs: env_or("IDLE_TIMEOUT_SECS", defaults.idle_timeout_secs),
            trade_history_limit: env_or("TRADE_HISTORY_LIMIT", defaults.trade_history_limit),
            health_port: env_or("HEALTH_PORT", defaults.health_port),
            status_log_interval_secs: env_or(
                "STATUS_LOG_INTERVAL_SECS",
                defaults.status_log_interval_secs,
            ),
        })
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            symbols: vec!["BTC/USD".to_string()],
            ws_endpoint: "wss://ws.kraken.com/v2".to_string(),
            rest_endpoint: "https://api.kraken.com/0/public/AssetPairs".to_string(),
            book_depth: None,
            request_snapshot: None,
            reconnect_delay_ms: 3000,
            max_reconnect_attempts: 0,
            connect_timeout_secs: 10,
            idle_timeout_secs: 30,
            trade_history_limit: 100,
            health_port: 9090,
            status_log_interval_secs: 30,
        }
    }
}

/// Parse an environment variable, keeping the default when unset or invalid
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env_opt(key).unwrap_or(default)
}

fn env_opt<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
