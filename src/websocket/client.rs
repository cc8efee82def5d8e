//! WebSocket client for the Kraken v2 feed
//!
//! Thin wrapper over one tungstenite stream: connect, send control frames,
//! receive frames and close with an explicit code.

use futures_util::{SinkExt, StreamExt};
use std::borrow::Cow;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::{frame::coding::CloseCode, CloseFrame, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use crate::error::{FeedError, Result};
use crate::feed::ABNORMAL_CLOSURE;
use crate::parser::ControlFrame;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code used when the peer sent a close frame without one
const NO_STATUS_RECEIVED: u16 = 1005;

/// What one receive produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Text(String),
    /// Ping, pong or raw frame; proves the connection is alive
    Control,
    /// Connection is gone, with the close code observed
    Closed(u16),
}

/// WebSocket client for a single connection
#[derive(Default)]
pub struct WebSocketClient {
    stream: Option<WsStream>,
}

impl WebSocketClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect to the endpoint, replacing any previous stream
    pub async fn connect(&mut self, endpoint: &str, connect_timeout: Duration) -> Result<()> {
        self.abort();
        info!(url = %endpoint, "Connecting to Kraken WebSocket");

        let (ws_stream, response) = timeout(connect_timeout, connect_async(endpoint))
            .await
            .map_err(|_| FeedError::ConnectionTimeout)?
            .map_err(|e| FeedError::WebSocketConnection(format!("Failed to connect: {}", e)))?;

        info!(status = ?response.status(), "WebSocket connected");
        self.stream = Some(ws_stream);

        Ok(())
    }

    pub async fn send(&mut self, frame: &ControlFrame) -> Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| FeedError::WebSocketConnection("Not connected".to_string()))?;

        let text = frame.to_json()?;
        debug!(frame = %text, "Sending control frame");
        stream
            .send(Message::Text(text))
            .await
            .map_err(|e| FeedError::WebSocketMessage(e.to_string()))
    }

    /// Receive the next frame
    pub async fn recv(&mut self) -> Result<Incoming> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| FeedError::WebSocketConnection("Not connected".to_string()))?;

        match stream.next().await {
            Some(Ok(Message::Text(text))) => Ok(Incoming::Text(text)),
            Some(Ok(Message::Binary(data))) => {
                Ok(Incoming::Text(String::from_utf8_lossy(&data).into_owned()))
            }
            Some(Ok(Message::Ping(data))) => {
                debug!("Received ping, sending pong");
                if let Err(e) = stream.send(Message::Pong(data)).await {
                    warn!(error = %e, "Failed to answer ping");
                }
                Ok(Incoming::Control)
            }
            Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => Ok(Incoming::Control),
            Some(Ok(Message::Close(frame))) => {
                let code = frame
                    .as_ref()
                    .map_or(NO_STATUS_RECEIVED, |f| u16::from(f.code));
                info!(code, reason = ?frame.as_ref().map(|f| f.reason.as_ref()), "Received close frame");
                self.stream = None;
                Ok(Incoming::Closed(code))
            }
            Some(Err(e)) => {
                self.stream = None;
                Err(FeedError::WebSocketMessage(e.to_string()))
            }
            None => {
                warn!("WebSocket stream ended");
                self.stream = None;
                Ok(Incoming::Closed(ABNORMAL_CLOSURE))
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Close the connection with an explicit code and reason
    pub async fn close(&mut self, code: u16, reason: &str) {
        if let Some(mut stream) = self.stream.take() {
            let frame = CloseFrame {
                code: CloseCode::from(code),
                reason: Cow::Owned(reason.to_string()),
            };
            if let Err(e) = stream.close(Some(frame)).await {
                debug!(error = %e, "Close handshake failed");
            }
        }
    }

    /// Drop the stream without a close handshake
    pub fn abort(&mut self) {
        self.stream = None;
    }
}
