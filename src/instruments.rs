//! Trading pair metadata from the Kraken REST API

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

use crate::error::{FeedError, Result};

/// One tradable pair as listed by `AssetPairs`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingPair {
    pub altname: String,
    /// Symbol used on the WebSocket feed, e.g. `XBT/USD`
    #[serde(default)]
    pub wsname: String,
    pub base: String,
    pub quote: String,
    #[serde(default)]
    pub pair_decimals: u32,
    #[serde(default)]
    pub lot_decimals: u32,
    #[serde(default)]
    pub ordermin: Option<Decimal>,
    #[serde(default)]
    pub costmin: Option<Decimal>,
    #[serde(default)]
    pub tick_size: Option<Decimal>,
    pub status: String,
}

#[derive(Debug, Deserialize)]
struct AssetPairsResponse {
    #[serde(default)]
    error: Vec<String>,
    #[serde(default)]
    result: HashMap<String, TradingPair>,
}

/// REST client for instrument metadata
pub struct InstrumentClient {
    http: reqwest::Client,
    endpoint: String,
}

impl InstrumentClient {
    pub fn new(endpoint: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.to_string(),
        }
    }

    /// Fetch every online trading pair, sorted by feed symbol
    pub async fn fetch_trading_pairs(&self) -> Result<Vec<TradingPair>> {
        info!(url = %self.endpoint, "Fetching trading pairs");

        let response = self
            .http
            .get(&self.endpoint)
            .send()
            .await?
            .error_for_status()?
            .json::<AssetPairsResponse>()
            .await?;

        let pairs = online_pairs(response)?;
        info!(count = pairs.len(), "Trading pairs loaded");
        Ok(pairs)
    }
}

fn online_pairs(response: AssetPairsResponse) -> Result<Vec<TradingPair>> {
    if !response.error.is_empty() {
        let message = response.error.join(", ");
        warn!(error = %message, "AssetPairs request rejected");
        return Err(FeedError::RestApiError(message));
    }

    let mut pairs: Vec<TradingPair> = response
        .result
        .into_values()
        .filter(|pair| pair.status == "online")
        .collect();
    pairs.sort_by(|a, b| a.wsname.cmp(&b.wsname));

    Ok(pairs)
}
