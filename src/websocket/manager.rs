//! WebSocket connection driver
//!
//! Executes the commands the feed service emits, owns the reconnect timer
//! and reports every transport event back to the service.

use std::pin::Pin;
use std::sync::Arc;
use tokio::time::{sleep, timeout_at, Instant, Sleep};
use tracing::{debug, info, warn};

use super::client::{Incoming, WebSocketClient};
use crate::error::{FeedError, Result};
use crate::feed::{Command, CommandReceiver, FeedService, ABNORMAL_CLOSURE, NORMAL_CLOSURE};

struct ReconnectTimer {
    generation: u64,
    sleep: Pin<Box<Sleep>>,
}

/// Drives the single feed connection until the service is disposed
pub struct WebSocketManager {
    service: Arc<FeedService>,
    commands: CommandReceiver,
    client: WebSocketClient,
    reconnect: Option<ReconnectTimer>,
    last_frame: Instant,
    /// Idle deadline is only enforced while something is subscribed
    idle_armed: bool,
}

impl WebSocketManager {
    pub fn new(service: Arc<FeedService>, commands: CommandReceiver) -> Self {
        Self {
            service,
            commands,
            client: WebSocketClient::new(),
            reconnect: None,
            last_frame: Instant::now(),
            idle_armed: false,
        }
    }

    /// Run until the service terminates or every sender is gone
    pub async fn run(mut self) -> Result<()> {
        info!("Starting WebSocket connection driver");

        loop {
            let deadline = self.idle_deadline();

            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    if !self.execute(command).await {
                        break;
                    }
                }
                incoming = recv_until(&mut self.client, deadline), if self.client.is_connected() => {
                    match incoming {
                        Some(incoming) => self.on_incoming(incoming),
                        None => self.on_idle(),
                    }
                }
                generation = wait_reconnect(&mut self.reconnect), if self.reconnect.is_some() => {
                    self.reconnect = None;
                    self.service.on_reconnect_timer(generation);
                }
            }
        }

        self.client.close(NORMAL_CLOSURE, "App closing").await;
        info!("WebSocket connection driver stopped");
        Ok(())
    }

    /// The feed only heartbeats while something is subscribed
    fn idle_deadline(&mut self) -> Option<Instant> {
        let armed = self.service.has_interest();
        if armed && !self.idle_armed {
            self.last_frame = Instant::now();
        }
        self.idle_armed = armed;
        armed.then(|| self.last_frame + self.service.config().idle_timeout())
    }

    /// Returns false once the driver should stop
    async fn execute(&mut self, command: Command) -> bool {
        debug!(?command, "Executing command");

        match command {
            Command::Connect { endpoint } => self.connect(&endpoint).await,
            Command::Send(frame) => {
                if !self.client.is_connected() {
                    // Already reported closed; the open replay covers it
                    debug!(channel = %frame.params.channel, "Dropping control frame, no open connection");
                } else if let Err(e) = self.client.send(&frame).await {
                    self.client.abort();
                    self.fail(e);
                }
            }
            Command::Close { code, reason } => self.client.close(code, &reason).await,
            Command::ScheduleReconnect { generation, delay } => {
                self.reconnect = Some(ReconnectTimer {
                    generation,
                    sleep: Box::pin(sleep(delay)),
                });
            }
            Command::CancelReconnect => self.reconnect = None,
            Command::Terminate => return false,
        }

        true
    }

    async fn connect(&mut self, endpoint: &str) {
        let connect_timeout = self.service.config().connect_timeout();
        match self.client.connect(endpoint, connect_timeout).await {
            Ok(()) => {
                self.last_frame = Instant::now();
                self.service.on_open();
            }
            Err(e) => self.fail(e),
        }
    }

    fn on_incoming(&mut self, incoming: Result<Incoming>) {
        match incoming {
            Ok(Incoming::Text(text)) => {
                self.last_frame = Instant::now();
                self.service.handle_frame(&text);
            }
            Ok(Incoming::Control) => self.last_frame = Instant::now(),
            Ok(Incoming::Closed(code)) => self.service.on_close(code),
            Err(e) => self.fail(e),
        }
    }

    fn on_idle(&mut self) {
        let idle_secs = self.service.config().idle_timeout_secs;
        warn!(idle_secs, "No message received within timeout, dropping connection");
        self.client.abort();
        self.fail(FeedError::IdleTimeout(idle_secs));
    }

    /// Report a broken connection as error followed by an abnormal close
    fn fail(&mut self, err: FeedError) {
        self.service.on_error(&err);
        self.service.on_close(ABNORMAL_CLOSURE);
    }
}

async fn recv_until(
    client: &mut WebSocketClient,
    deadline: Option<Instant>,
) -> Option<Result<Incoming>> {
    match deadline {
        Some(deadline) => timeout_at(deadline, client.recv()).await.ok(),
        None => Some(client.recv().await),
    }
}

async fn wait_reconnect(timer: &mut Option<ReconnectTimer>) -> u64 {
    match timer {
        Some(timer) => {
            timer.sleep.as_mut().await;
            timer.generation
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::parser::{ChannelKind, ControlFrame, ControlParams, Method};

    fn manager() -> (Arc<FeedService>, WebSocketManager) {
        let (service, commands) = FeedService::create(Arc::new(Config::default())).unwrap();
        let manager = WebSocketManager::new(Arc::clone(&service), commands);
        (service, manager)
    }

    #[tokio::test]
    async fn test_send_without_connection_is_dropped() {
        let (service, mut manager) = manager();
        let frame = ControlFrame {
            method: Method::Subscribe,
            params: ControlParams {
                channel: ChannelKind::Book,
                symbol: vec!["BTC/USD".to_string()],
                depth: None,
                snapshot: None,
            },
        };

        assert!(manager.execute(Command::Send(frame)).await);

        assert!(service.last_error().is_none());
        assert_eq!(service.pending_reconnect(), None);
    }

    #[test]
    fn test_idle_deadline_follows_interest() {
        let (service, mut manager) = manager();
        assert_eq!(manager.idle_deadline(), None);

        service.subscribe(ChannelKind::Ticker, "BTC/USD");
        let deadline = manager.idle_deadline().unwrap();
        assert!(deadline > Instant::now());

        service.unsubscribe(ChannelKind::Ticker, "BTC/USD");
        assert_eq!(manager.idle_deadline(), None);
    }
}
