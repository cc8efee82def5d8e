//! Feed service
//!
//! Owns the connection state machine, the subscription registry, every
//! reconstructed book and cache, and the listener fan-out. All of it sits
//! behind one lock and is only mutated by the methods below; the WebSocket
//! driver executes the [`Command`]s emitted here and reports transport
//! events back through `on_open`, `handle_frame`, `on_error`, `on_close` and
//! `on_reconnect_timer`.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};

use super::fanout::{dispatch, EventFanout, Listener, ListenerId};
use super::registry::{Acquire, Release, SubscriptionRegistry};
use super::FeedEvent;
use crate::config::Config;
use crate::error::{FeedError, Result};
use crate::metrics::FeedMetrics;
use crate::orderbook::{OrderBookManager, OrderBookState};
use crate::parser::{
    ChannelKind, ControlFrame, ControlParams, Method, MethodResponse, ParsedMessage, TickerSnapshot,
    TradeRecord,
};
use crate::ticker::TickerCache;
use crate::trades::{TradeHistory, TradeHistoryState};

/// Close code for an intentional shutdown
pub const NORMAL_CLOSURE: u16 = 1000;
/// Close code reported when the transport dropped without a close frame
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Connection status exposed to consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Disconnected,
    Connecting,
    Connected,
    /// Errored, waiting for the close event
    Failed,
}

impl Phase {
    fn status(self) -> ConnectionStatus {
        match self {
            Phase::Connecting => ConnectionStatus::Connecting,
            Phase::Connected => ConnectionStatus::Connected,
            Phase::Disconnected | Phase::Failed => ConnectionStatus::Disconnected,
        }
    }
}

/// Instructions for the transport driver, in the order they must run
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Connect { endpoint: String },
    Send(ControlFrame),
    Close { code: u16, reason: String },
    /// Replaces any pending reconnect timer
    ScheduleReconnect { generation: u64, delay: Duration },
    CancelReconnect,
    /// The service was disposed; the driver should exit
    Terminate,
}

pub type CommandReceiver = mpsc::UnboundedReceiver<Command>;

/// Host lifecycle signals that end the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageLifecycle {
    Visible,
    Hidden,
    PageHide,
    BeforeUnload,
}

struct FeedState {
    phase: Phase,
    last_error: Option<String>,
    should_reconnect: bool,
    disposed: bool,
    reconnect_generation: u64,
    pending_reconnect: Option<u64>,
    reconnect_attempts: u32,
    /// Bumped by reset/dispose; interest taken before then is already gone
    epoch: u64,
    registry: SubscriptionRegistry,
    books: OrderBookManager,
    tickers: TickerCache,
    trades: TradeHistory,
    fanout: EventFanout,
}

/// Single-connection feed client shared by every consumer
pub struct FeedService {
    config: Arc<Config>,
    state: Mutex<FeedState>,
    commands: mpsc::UnboundedSender<Command>,
    status_tx: watch::Sender<ConnectionStatus>,
    metrics: FeedMetrics,
}

impl FeedService {
    /// Create a service and the command stream its driver consumes
    pub fn create(config: Arc<Config>) -> Result<(Arc<Self>, CommandReceiver)> {
        let (commands, receiver) = mpsc::unbounded_channel();
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        let metrics = FeedMetrics::new()?;

        let state = FeedState {
            phase: Phase::Disconnected,
            last_error: None,
            should_reconnect: true,
            disposed: false,
            reconnect_generation: 0,
            pending_reconnect: None,
            reconnect_attempts: 0,
            epoch: 0,
            registry: SubscriptionRegistry::new(),
            books: OrderBookManager::with_depth(config.book_depth.map(|d| d as usize)),
            tickers: TickerCache::new(),
            trades: TradeHistory::new(config.trade_history_limit),
            fanout: EventFanout::new(),
        };

        let service = Arc::new(Self {
            config,
            state: Mutex::new(state),
            commands,
            status_tx,
            metrics,
        });

        Ok((service, receiver))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> &FeedMetrics {
        &self.metrics
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    /// Open the connection unless one exists or is being established
    pub fn ensure_connected(&self) {
        let mut state = self.state.lock();
        if state.disposed {
            warn!("ensure_connected called on a disposed feed service");
            return;
        }
        self.connect_locked(&mut state);
    }

    fn connect_locked(&self, state: &mut FeedState) {
        if state.phase != Phase::Disconnected {
            debug!(phase = ?state.phase, "Connection already exists or is in progress");
            return;
        }

        // An explicit connect starts a new session after a shutdown
        state.should_reconnect = true;
        if state.pending_reconnect.take().is_some() {
            self.emit(Command::CancelReconnect);
        }

        info!(endpoint = %self.config.ws_endpoint, "Opening feed connection");
        self.set_phase(state, Phase::Connecting);
        self.emit(Command::Connect {
            endpoint: self.config.ws_endpoint.clone(),
        });
    }

    /// Transport reported an open connection; replay every active subscription
    pub fn on_open(&self) {
        let mut state = self.state.lock();
        if state.phase != Phase::Connecting {
            debug!(phase = ?state.phase, "Ignoring open for a connection that is no longer wanted");
            return;
        }

        self.set_phase(&mut state, Phase::Connected);
        state.last_error = None;
        state.reconnect_attempts = 0;

        let replay = state.registry.replay();
        info!(channels = replay.len(), "Feed connected, replaying subscriptions");
        for (kind, symbols) in replay {
            self.emit(Command::Send(self.control(Method::Subscribe, kind, symbols)));
        }
    }

    /// Transport error; the connection is unusable until its close event
    pub fn on_error(&self, err: &FeedError) {
        let mut state = self.state.lock();
        warn!(error = %err, phase = ?state.phase, "Feed connection error");
        state.last_error = Some(err.to_string());
        if matches!(state.phase, Phase::Connecting | Phase::Connected) {
            self.set_phase(&mut state, Phase::Failed);
        }
    }

    /// Transport closed; schedule a reconnect unless the closure was intentional
    pub fn on_close(&self, code: u16) {
        let mut state = self.state.lock();
        self.set_phase(&mut state, Phase::Disconnected);

        // Books need a fresh snapshot once the stream is broken
        state.books.clear();
        self.metrics.active_books.set(0);

        if code == NORMAL_CLOSURE || !state.should_reconnect || state.disposed {
            info!(code, "Feed connection closed");
            return;
        }

        let max_attempts = self.config.max_reconnect_attempts;
        if max_attempts > 0 && state.reconnect_attempts >= max_attempts {
            error!(attempts = state.reconnect_attempts, "Maximum reconnection attempts reached");
            state.last_error = Some(FeedError::MaxReconnectAttemptsExceeded.to_string());
            return;
        }

        state.reconnect_attempts += 1;
        state.reconnect_generation += 1;
        let generation = state.reconnect_generation;
        state.pending_reconnect = Some(generation);
        self.metrics.reconnects_scheduled.inc();

        let delay = self.config.reconnect_delay();
        warn!(
            code,
            attempt = state.reconnect_attempts,
            delay_ms = delay.as_millis() as u64,
            "Feed connection lost, scheduling reconnect"
        );
        self.emit(Command::ScheduleReconnect { generation, delay });
    }

    /// A reconnect timer fired; stale or cancelled timers are ignored
    pub fn on_reconnect_timer(&self, generation: u64) {
        let mut state = self.state.lock();
        if state.pending_reconnect != Some(generation) {
            debug!(generation, "Ignoring stale reconnect timer");
            return;
        }
        state.pending_reconnect = None;

        if !state.should_reconnect || state.disposed || state.phase != Phase::Disconnected {
            return;
        }

        info!(attempt = state.reconnect_attempts, "Reconnecting to feed");
        self.set_phase(&mut state, Phase::Connecting);
        self.emit(Command::Connect {
            endpoint: self.config.ws_endpoint.clone(),
        });
    }

    /// Close the connection and disable reconnection. Idempotent.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        self.shutdown_locked(&mut state);
    }

    fn shutdown_locked(&self, state: &mut FeedState) {
        state.should_reconnect = false;

        if state.pending_reconnect.take().is_some() {
            self.emit(Command::CancelReconnect);
        }

        if state.phase != Phase::Disconnected {
            info!("Shutting down feed connection");
            self.emit(Command::Close {
                code: NORMAL_CLOSURE,
                reason: "App closing".to_string(),
            });
            self.set_phase(state, Phase::Disconnected);
            state.books.clear();
            self.metrics.active_books.set(0);
        }
    }

    /// Hidden and unloading pages must not keep the connection open
    pub fn on_lifecycle(&self, event: PageLifecycle) {
        match event {
            PageLifecycle::Hidden | PageLifecycle::PageHide | PageLifecycle::BeforeUnload => {
                debug!(?event, "Page lifecycle ends the feed session");
                self.shutdown();
            }
            PageLifecycle::Visible => {}
        }
    }

    /// Shut down and forget every subscription, cache and listener
    ///
    /// The service stays usable; the next subscribe starts from scratch.
    pub fn reset(&self) {
        let listeners = {
            let mut state = self.state.lock();
            self.shutdown_locked(&mut state);
            self.clear_locked(&mut state);
            state.should_reconnect = true;
            state.fanout.drain()
        };
        // Listener closures may own handles back into the service
        drop(listeners);
    }

    /// End the service: close the connection and stop the driver
    pub fn dispose(&self) {
        let listeners = {
            let mut state = self.state.lock();
            if state.disposed {
                return;
            }
            self.shutdown_locked(&mut state);
            self.clear_locked(&mut state);
            state.disposed = true;
            self.emit(Command::Terminate);
            state.fanout.drain()
        };
        drop(listeners);
        info!("Feed service disposed");
    }

    fn clear_locked(&self, state: &mut FeedState) {
        state.epoch += 1;
        state.registry.clear();
        state.books.clear();
        state.tickers.clear();
        state.trades.clear();
        state.last_error = None;
        state.reconnect_attempts = 0;
        self.metrics.active_books.set(0);
    }

    // ------------------------------------------------------------------
    // Subscription registry
    // ------------------------------------------------------------------

    /// Register interest in a symbol; only the first consumer causes wire traffic
    pub fn subscribe(&self, kind: ChannelKind, symbol: &str) {
        let mut state = self.state.lock();
        self.subscribe_locked(&mut state, kind, symbol);
    }

    /// Subscribe and return the epoch the interest belongs to
    pub(crate) fn acquire(&self, kind: ChannelKind, symbol: &str) -> u64 {
        let mut state = self.state.lock();
        self.subscribe_locked(&mut state, kind, symbol);
        state.epoch
    }

    /// Release interest taken by [`acquire`](Self::acquire); a reset since then already dropped it
    pub(crate) fn release(&self, kind: ChannelKind, symbol: &str, epoch: u64) {
        let mut state = self.state.lock();
        if state.epoch != epoch {
            debug!(channel = %kind, symbol = %symbol, "Ignoring release of interest cleared by a reset");
            return;
        }
        self.unsubscribe_locked(&mut state, kind, symbol);
    }

    fn subscribe_locked(&self, state: &mut FeedState, kind: ChannelKind, symbol: &str) {
        if state.disposed {
            warn!(channel = %kind, symbol = %symbol, "Subscribe on a disposed feed service");
            return;
        }

        if let Acquire::Shared(consumers) = state.registry.acquire(kind, symbol) {
            debug!(channel = %kind, symbol = %symbol, consumers, "Sharing existing subscription");
            return;
        }

        match state.phase {
            Phase::Connected => {
                info!(channel = %kind, symbol = %symbol, "Subscribing");
                self.emit(Command::Send(self.control(
                    Method::Subscribe,
                    kind,
                    vec![symbol.to_string()],
                )));
            }
            // Replayed once the connection opens
            Phase::Connecting | Phase::Failed => {}
            Phase::Disconnected => self.connect_locked(state),
        }
    }

    /// Drop interest in a symbol; the last consumer unsubscribes upstream
    pub fn unsubscribe(&self, kind: ChannelKind, symbol: &str) {
        let mut state = self.state.lock();
        self.unsubscribe_locked(&mut state, kind, symbol);
    }

    fn unsubscribe_locked(&self, state: &mut FeedState, kind: ChannelKind, symbol: &str) {
        match state.registry.release(kind, symbol) {
            Release::Last => {}
            Release::Remaining(consumers) => {
                debug!(channel = %kind, symbol = %symbol, consumers, "Subscription still in use");
                return;
            }
            Release::NotSubscribed => {
                debug!(channel = %kind, symbol = %symbol, "Unsubscribe for a symbol with no interest");
                return;
            }
        }

        if state.phase == Phase::Connected {
            info!(channel = %kind, symbol = %symbol, "Unsubscribing");
            self.emit(Command::Send(self.control(
                Method::Unsubscribe,
                kind,
                vec![symbol.to_string()],
            )));
        }

        match kind {
            ChannelKind::Book => {
                state.books.remove(symbol);
                self.metrics.active_books.set(state.books.len() as i64);
            }
            ChannelKind::Ticker => {
                state.tickers.remove(symbol);
            }
            ChannelKind::Trade => {
                state.trades.remove(symbol);
            }
        }
    }

    fn control(&self, method: Method, kind: ChannelKind, symbols: Vec<String>) -> ControlFrame {
        ControlFrame {
            method,
            params: ControlParams {
                channel: kind,
                symbol: symbols,
                depth: if kind == ChannelKind::Book {
                    self.config.book_depth
                } else {
                    None
                },
                snapshot: if method == Method::Subscribe {
                    self.config.request_snapshot
                } else {
                    None
                },
            },
        }
    }

    // ------------------------------------------------------------------
    // Inbound frames and fan-out
    // ------------------------------------------------------------------

    /// Register a listener for every event of one channel kind
    pub fn add_listener<F>(self: &Arc<Self>, kind: ChannelKind, listener: F) -> ListenerHandle
    where
        F: Fn(&FeedEvent) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);
        let id = self.state.lock().fanout.add(kind, listener);
        ListenerHandle {
            service: Arc::downgrade(self),
            id,
            kind,
        }
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let removed = self.state.lock().fanout.remove(id);
        removed.is_some()
    }

    /// Decode one inbound frame, update state and notify listeners
    ///
    /// Malformed frames are logged and dropped.
    pub fn handle_frame(&self, raw: &str) {
        self.metrics.frames_received.inc();

        let message = match ParsedMessage::parse(raw) {
            Ok(message) => message,
            Err(e) => {
                self.metrics.parse_errors.inc();
                warn!(error = %e, len = raw.len(), "Failed to parse feed message");
                return;
            }
        };

        let (listeners, events) = {
            let mut state = self.state.lock();
            if state.disposed {
                return;
            }
            let events = self.apply_message(&mut state, message);
            let Some(kind) = events.first().map(FeedEvent::kind) else {
                return;
            };
            (state.fanout.snapshot(kind), events)
        };

        dispatch(&listeners, &events);
    }

    fn apply_message(&self, state: &mut FeedState, message: ParsedMessage) -> Vec<FeedEvent> {
        match message {
            ParsedMessage::Book { message_type, data } => {
                let mut events = Vec::with_capacity(data.len());
                for entry in &data {
                    if !state.registry.is_interested(ChannelKind::Book, &entry.symbol) {
                        trace!(symbol = %entry.symbol, "Dropping book data for unsubscribed symbol");
                        continue;
                    }
                    match state.books.apply(message_type, entry) {
                        Some(book) => events.push(FeedEvent::Book(book)),
                        None => debug!(symbol = %entry.symbol, "Book update before snapshot ignored"),
                    }
                }
                self.metrics.active_books.set(state.books.len() as i64);
                events
            }
            ParsedMessage::Ticker { message_type, data } => data
                .iter()
                .filter(|entry| state.registry.is_interested(ChannelKind::Ticker, &entry.symbol))
                .map(|entry| FeedEvent::Ticker(state.tickers.apply(message_type, entry)))
                .collect(),
            ParsedMessage::Trade { message_type, data } => group_by_symbol(data)
                .into_iter()
                .filter(|(symbol, _)| state.registry.is_interested(ChannelKind::Trade, symbol))
                .map(|(symbol, records)| {
                    FeedEvent::Trade(state.trades.apply(message_type, &symbol, &records))
                })
                .collect(),
            ParsedMessage::MethodResponse(ack) => {
                self.handle_ack(state, ack);
                Vec::new()
            }
            ParsedMessage::Heartbeat => {
                trace!("Heartbeat");
                Vec::new()
            }
            ParsedMessage::Status(data) => {
                info!(status = %data, "Feed status");
                Vec::new()
            }
            ParsedMessage::Unknown(msg) => {
                trace!(msg = %msg, "Unknown message type");
                Vec::new()
            }
        }
    }

    fn handle_ack(&self, state: &mut FeedState, ack: MethodResponse) {
        if ack.success {
            debug!(method = %ack.method, channel = ?ack.channel, symbol = ?ack.symbol, "Request acknowledged");
            return;
        }

        self.metrics.subscription_failures.inc();
        let err = FeedError::SubscriptionFailed {
            channel: ack.channel.unwrap_or_else(|| "unknown channel".to_string()),
            reason: ack.error.unwrap_or_else(|| "no reason given".to_string()),
        };
        warn!(method = %ack.method, symbol = ?ack.symbol, error = %err, "Feed rejected request");
        state.last_error = Some(err.to_string());
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    pub fn status(&self) -> ConnectionStatus {
        self.state.lock().phase.status()
    }

    /// Receiver that observes every status change
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    pub fn last_error(&self) -> Option<String> {
        self.state.lock().last_error.clone()
    }

    pub fn book(&self, symbol: &str) -> Option<OrderBookState> {
        self.state.lock().books.get_state(symbol)
    }

    pub fn ticker(&self, symbol: &str) -> Option<TickerSnapshot> {
        self.state.lock().tickers.get(symbol).cloned()
    }

    pub fn trades(&self, symbol: &str) -> Option<TradeHistoryState> {
        self.state.lock().trades.get(symbol)
    }

    /// Interest set for one channel kind
    pub fn subscriptions(&self, kind: ChannelKind) -> Vec<String> {
        self.state.lock().registry.symbols(kind)
    }

    /// Whether any channel kind has a subscribed symbol
    pub fn has_interest(&self) -> bool {
        !self.state.lock().registry.is_empty()
    }

    pub fn consumers(&self, kind: ChannelKind, symbol: &str) -> usize {
        self.state.lock().registry.consumers(kind, symbol)
    }

    pub fn listener_count(&self, kind: ChannelKind) -> usize {
        self.state.lock().fanout.len(kind)
    }

    /// Generation of the pending reconnect timer, if any
    pub fn pending_reconnect(&self) -> Option<u64> {
        self.state.lock().pending_reconnect
    }

    pub fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }

    fn set_phase(&self, state: &mut FeedState, phase: Phase) {
        state.phase = phase;
        let status = phase.status();
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }

    fn emit(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("Connection driver is gone, dropping command");
        }
    }
}

/// Split trade records by symbol, keeping first-seen order
fn group_by_symbol(records: Vec<TradeRecord>) -> Vec<(String, Vec<TradeRecord>)> {
    let mut groups: Vec<(String, Vec<TradeRecord>)> = Vec::new();
    for record in records {
        match groups.iter_mut().find(|(symbol, _)| *symbol == record.symbol) {
            Some((_, group)) => group.push(record),
            None => groups.push((record.symbol.clone(), vec![record])),
        }
    }
    groups
}

/// Registration returned by [`FeedService::add_listener`]; dropping it removes the listener
#[must_use = "dropping the handle removes the listener"]
pub struct ListenerHandle {
    service: Weak<FeedService>,
    id: ListenerId,
    kind: ChannelKind,
}

impl ListenerHandle {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Remove the listener now instead of at end of scope
    pub fn remove(self) {
        drop(self);
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(service) = self.service.upgrade() {
            service.remove_listener(self.id);
        }
    }
}
