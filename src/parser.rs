//! Parser module for Kraken WebSocket v2 messages
//!
//! Every frame shape exchanged with the feed lives here: outbound control
//! frames, inbound ticker/book/trade data, heartbeats, status and method
//! acknowledgements.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Independent data stream carried over the shared connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Ticker,
    Book,
    Trade,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 3] = [ChannelKind::Ticker, ChannelKind::Book, ChannelKind::Trade];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Ticker => "ticker",
            ChannelKind::Book => "book",
            ChannelKind::Trade => "trade",
        }
    }

    fn from_channel(channel: &str) -> Option<Self> {
        match channel {
            "ticker" => Some(ChannelKind::Ticker),
            "book" => Some(ChannelKind::Book),
            "trade" => Some(ChannelKind::Trade),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a data frame replaces or modifies state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Snapshot,
    Update,
}

impl MessageType {
    fn from_type(value: &str) -> Option<Self> {
        match value {
            "snapshot" => Some(MessageType::Snapshot),
            "update" => Some(MessageType::Update),
            _ => None,
        }
    }
}

/// Control frame method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Subscribe,
    Unsubscribe,
}

/// Outbound subscribe/unsubscribe request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlFrame {
    pub method: Method,
    pub params: ControlParams,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlParams {
    pub channel: ChannelKind,
    pub symbol: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<bool>,
}

impl ControlFrame {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Price level (price, quantity pair)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    #[serde(rename = "qty")]
    pub quantity: Decimal,
}

/// One `data` entry of a book frame
#[derive(Debug, Clone, Deserialize)]
pub struct BookData {
    pub symbol: String,

    #[serde(default)]
    pub bids: Vec<PriceLevel>,

    #[serde(default)]
    pub asks: Vec<PriceLevel>,

    /// CRC32 of the top of book as computed by the exchange
    #[serde(default)]
    pub checksum: Option<u32>,

    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Ticker fields for one symbol
///
/// Update frames may carry any subset of the fields; absent ones stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickerSnapshot {
    pub symbol: String,
    #[serde(default)]
    pub bid: Option<Decimal>,
    #[serde(default)]
    pub bid_qty: Option<Decimal>,
    #[serde(default)]
    pub ask: Option<Decimal>,
    #[serde(default)]
    pub ask_qty: Option<Decimal>,
    #[serde(default)]
    pub last: Option<Decimal>,
    #[serde(default)]
    pub volume: Option<Decimal>,
    #[serde(default)]
    pub vwap: Option<Decimal>,
    #[serde(default)]
    pub low: Option<Decimal>,
    #[serde(default)]
    pub high: Option<Decimal>,
    #[serde(default)]
    pub change: Option<Decimal>,
    #[serde(default)]
    pub change_pct: Option<Decimal>,
}

/// Taker side of a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
    #[serde(other)]
    Other,
}

/// Single executed trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub side: TradeSide,
    pub price: Decimal,
    #[serde(rename = "qty")]
    pub quantity: Decimal,
    pub ord_type: OrderType,
    pub trade_id: u64,
    pub timestamp: DateTime<Utc>,
}

/// Acknowledgement of a subscribe/unsubscribe request
#[derive(Debug, Clone, PartialEq)]
pub struct MethodResponse {
    pub method: String,
    pub success: bool,
    pub error: Option<String>,
    pub channel: Option<String>,
    pub symbol: Option<String>,
}

/// Raw frame envelope, before the `data` payload is interpreted
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    channel: Option<String>,

    #[serde(default, rename = "type")]
    message_type: Option<String>,

    #[serde(default)]
    data: serde_json::Value,

    #[serde(default)]
    method: Option<String>,

    #[serde(default)]
    success: Option<bool>,

    #[serde(default)]
    error: Option<String>,

    #[serde(default)]
    result: Option<AckResult>,
}

#[derive(Debug, Deserialize)]
struct AckResult {
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    symbol: Option<String>,
}

/// Parsed WebSocket message
#[derive(Debug, Clone)]
pub enum ParsedMessage {
    Ticker {
        message_type: MessageType,
        data: Vec<TickerSnapshot>,
    },
    Book {
        message_type: MessageType,
        data: Vec<BookData>,
    },
    Trade {
        message_type: MessageType,
        data: Vec<TradeRecord>,
    },
    Heartbeat,
    Status(serde_json::Value),
    MethodResponse(MethodResponse),
    Unknown(String),
}

impl ParsedMessage {
    /// Parse a raw WebSocket message
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let envelope: Envelope = serde_json::from_str(raw)?;

        if let Some(method) = envelope.method {
            let (channel, symbol) = envelope
                .result
                .map(|r| (r.channel, r.symbol))
                .unwrap_or((None, None));
            return Ok(ParsedMessage::MethodResponse(MethodResponse {
                method,
                success: envelope.success.unwrap_or(true),
                error: envelope.error,
                channel,
                symbol,
            }));
        }

        let Some(channel) = envelope.channel else {
            return Ok(ParsedMessage::Unknown(raw.to_string()));
        };

        match channel.as_str() {
            "heartbeat" => return Ok(ParsedMessage::Heartbeat),
            "status" => return Ok(ParsedMessage::Status(envelope.data)),
            _ => {}
        }

        let (Some(kind), Some(message_type)) = (
            ChannelKind::from_channel(&channel),
            envelope.message_type.as_deref().and_then(MessageType::from_type),
        ) else {
            return Ok(ParsedMessage::Unknown(raw.to_string()));
        };

        // Data channels always carry an array; anything else is not ours to interpret
        if !envelope.data.is_array() {
            return Ok(ParsedMessage::Unknown(raw.to_string()));
        }

        Ok(match kind {
            ChannelKind::Ticker => ParsedMessage::Ticker {
                message_type,
                data: serde_json::from_value(envelope.data)?,
            },
            ChannelKind::Book => ParsedMessage::Book {
                message_type,
                data: serde_json::from_value(envelope.data)?,
            },
            ChannelKind::Trade => ParsedMessage::Trade {
                message_type,
                data: serde_json::from_value(envelope.data)?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_book_snapshot() {
        let raw = r#"{
            "channel": "book",
            "type": "snapshot",
            "data": [{
                "symbol": "BTC/USD",
                "bids": [{"price": 45283.5, "qty": 0.1}, {"price": 45283.4, "qty": 1.2}],
                "asks": [{"price": 45285.2, "qty": 0.001}],
                "checksum": 974947235
            }]
        }"#;

        let msg = ParsedMessage::parse(raw).unwrap();
        if let ParsedMessage::Book { message_type, data } = msg {
            assert_eq!(message_type, MessageType::Snapshot);
            assert_eq!(data[0].symbol, "BTC/USD");
            assert_eq!(data[0].bids.len(), 2);
            assert_eq!(data[0].bids[0].price, dec!(45283.5));
            assert_eq!(data[0].asks[0].quantity, dec!(0.001));
            assert_eq!(data[0].checksum, Some(974947235));
        } else {
            panic!("Expected Book");
        }
    }

    #[test]
    fn test_parse_book_update_without_checksum() {
        let raw = r#"{"channel":"book","type":"update","data":[{"symbol":"ETH/USD","asks":[{"price":2000,"qty":0}]}]}"#;

        let msg = ParsedMessage::parse(raw).unwrap();
        if let ParsedMessage::Book { message_type, data } = msg {
            assert_eq!(message_type, MessageType::Update);
            assert!(data[0].bids.is_empty());
            assert!(data[0].asks[0].quantity.is_zero());
            assert_eq!(data[0].checksum, None);
        } else {
            panic!("Expected Book");
        }
    }

    #[test]
    fn test_parse_partial_ticker_update() {
        let raw = r#"{"channel":"ticker","type":"update","data":[{"symbol":"BTC/USD","bid":10.5}]}"#;

        let msg = ParsedMessage::parse(raw).unwrap();
        if let ParsedMessage::Ticker { data, .. } = msg {
            assert_eq!(data[0].bid, Some(dec!(10.5)));
            assert_eq!(data[0].ask, None);
        } else {
            panic!("Expected Ticker");
        }
    }

    #[test]
    fn test_parse_trade() {
        let raw = r#"{
            "channel": "trade",
            "type": "update",
            "data": [{
                "symbol": "MATIC/USD",
                "side": "sell",
                "price": 0.5147,
                "qty": 6423.46326,
                "ord_type": "limit",
                "trade_id": 4665846,
                "timestamp": "2023-09-25T07:48:36.925533Z"
            }]
        }"#;

        let msg = ParsedMessage::parse(raw).unwrap();
        if let ParsedMessage::Trade { data, .. } = msg {
            assert_eq!(data[0].side, TradeSide::Sell);
            assert_eq!(data[0].ord_type, OrderType::Limit);
            assert_eq!(data[0].trade_id, 4665846);
            assert_eq!(data[0].price, dec!(0.5147));
        } else {
            panic!("Expected Trade");
        }
    }

    #[test]
    fn test_parse_failed_subscription_ack() {
        let raw = r#"{"error":"Currency pair not supported FOO/BAR","method":"subscribe","success":false,"time_in":"2023-09-25T09:04:31.742599Z","time_out":"2023-09-25T09:04:31.742648Z"}"#;

        match ParsedMessage::parse(raw).unwrap() {
            ParsedMessage::MethodResponse(ack) => {
                assert_eq!(ack.method, "subscribe");
                assert!(!ack.success);
                assert_eq!(ack.error.as_deref(), Some("Currency pair not supported FOO/BAR"));
            }
            other => panic!("Expected MethodResponse, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_heartbeat_and_unknown() {
        assert!(matches!(
            ParsedMessage::parse(r#"{"channel":"heartbeat"}"#).unwrap(),
            ParsedMessage::Heartbeat
        ));
        assert!(matches!(
            ParsedMessage::parse(r#"{"channel":"book","type":"partial","data":[]}"#).unwrap(),
            ParsedMessage::Unknown(_)
        ));
        assert!(matches!(
            ParsedMessage::parse(r#"{"channel":"book","type":"update","data":{}}"#).unwrap(),
            ParsedMessage::Unknown(_)
        ));
    }

    #[test]
    fn test_malformed_payload_is_an_error() {
        assert!(ParsedMessage::parse("{not json").is_err());
        assert!(ParsedMessage::parse(r#"{"channel":"book","type":"snapshot","data":[{"bids":[]}]}"#).is_err());
    }

    #[test]
    fn test_control_frame_omits_unset_params() {
        let frame = ControlFrame {
            method: Method::Subscribe,
            params: ControlParams {
                channel: ChannelKind::Ticker,
                symbol: vec!["BTC/USD".to_string(), "ETH/USD".to_string()],
                depth: None,
                snapshot: None,
            },
        };
        assert_eq!(
            frame.to_json().unwrap(),
            r#"{"method":"subscribe","params":{"channel":"ticker","symbol":["BTC/USD","ETH/USD"]}}"#
        );

        let book = ControlFrame {
            method: Method::Unsubscribe,
            params: ControlParams {
                channel: ChannelKind::Book,
                symbol: vec!["BTC/USD".to_string()],
                depth: Some(25),
                snapshot: Some(true),
            },
        };
        assert_eq!(
            book.to_json().unwrap(),
            r#"{"method":"unsubscribe","params":{"channel":"book","symbol":["BTC/USD"],"depth":25,"snapshot":true}}"#
        );
    }
}
