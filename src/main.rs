//! Kraken Book Sync - Feed Client
//!
//! Connects to the Kraken WebSocket v2 feed, mounts book, ticker and trade
//! consumers for the configured symbols and logs their state periodically.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use kraken_book_sync::{
    AppState, BookConsumer, ChannelKind, Config, FeedService, InstrumentClient, PageLifecycle,
    TickerConsumer, TradeConsumer, WebSocketManager,
};

/// Consumers mounted for one configured symbol
struct SymbolView {
    book: BookConsumer,
    ticker: TickerConsumer,
    trades: TradeConsumer,
}

impl SymbolView {
    fn mount(service: &Arc<FeedService>, symbol: &str) -> Self {
        Self {
            book: BookConsumer::new(Arc::clone(service), symbol),
            ticker: TickerConsumer::new(Arc::clone(service), symbol),
            trades: TradeConsumer::new(Arc::clone(service), symbol),
        }
    }

    fn log_status(&self) {
        let symbol = self.book.symbol();

        if let Some(book) = self.book.latest() {
            info!(
                symbol = %symbol,
                best_bid = ?book.best_bid().map(|l| l.price),
                best_ask = ?book.best_ask().map(|l| l.price),
                spread = ?book.spread(),
                bid_levels = book.bids.len(),
                ask_levels = book.asks.len(),
                checksum = book.checksum,
                "Order book status"
            );
        }

        if let Some(ticker) = self.ticker.latest() {
            info!(
                symbol = %symbol,
                last = ?ticker.last,
                volume = ?ticker.volume,
                change_pct = ?ticker.change_pct,
                "Ticker status"
            );
        }

        if let Some(history) = self.trades.latest() {
            info!(
                symbol = %symbol,
                trades = history.trades.len(),
                last_price = ?history.trades.first().map(|t| t.price),
                "Trade status"
            );
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Starting Kraken Book Sync");

    let config = Arc::new(Config::load()?);
    info!(symbols = ?config.symbols, endpoint = %config.ws_endpoint, "Configuration loaded");

    let (service, commands) = FeedService::create(Arc::clone(&config))?;

    let state = Arc::new(AppState {
        service: Arc::clone(&service),
        config: Arc::clone(&config),
    });

    // Start health check server
    let health_state = Arc::clone(&state);
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_state).await {
            warn!(error = %e, "Health server error");
        }
    });

    // Instrument metadata is informational; streaming does not depend on it
    let instruments = InstrumentClient::new(&config.rest_endpoint);
    match instruments.fetch_trading_pairs().await {
        Ok(pairs) => info!(online_pairs = pairs.len(), "Instrument metadata available"),
        Err(e) => warn!(error = %e, "Failed to fetch trading pairs"),
    }

    let driver = tokio::spawn(WebSocketManager::new(Arc::clone(&service), commands).run());

    let views: Vec<SymbolView> = config
        .symbols
        .iter()
        .map(|symbol| SymbolView::mount(&service, symbol))
        .collect();

    let mut status_interval = interval(Duration::from_secs(config.status_log_interval_secs.max(1)));
    loop {
        tokio::select! {
            _ = status_interval.tick() => {
                info!(status = ?service.status(), error = ?service.last_error(), "Feed status");
                for view in &views {
                    view.log_status();
                }
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "Failed to listen for shutdown signal");
                }
                info!("Shutdown signal received");
                break;
            }
        }
    }

    service.on_lifecycle(PageLifecycle::BeforeUnload);
    drop(views);
    service.dispose();
    driver.await??;

    info!("Kraken Book Sync stopped");
    Ok(())
}

/// Start HTTP server for health checks and metrics
async fn start_health_server(state: Arc<AppState>) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(Arc::clone(&state));

    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.health_port));
    info!(addr = %addr, "Starting health check server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let service = &state.service;
    Json(serde_json::json!({
        "status": service.status(),
        "error": service.last_error(),
        "component": "kraken-book-sync",
        "books": service.subscriptions(ChannelKind::Book),
        "tickers": service.subscriptions(ChannelKind::Ticker),
        "trades": service.subscriptions(ChannelKind::Trade),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn metrics(State(state): State<Arc<AppState>>) -> Result<String, (StatusCode, String)> {
    state
        .service
        .metrics()
        .render()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}
