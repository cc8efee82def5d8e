//! Prometheus metrics for the feed service

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

use crate::error::{FeedError, Result};

/// Counters owned by one feed service
#[derive(Clone)]
pub struct FeedMetrics {
    registry: Registry,
    pub frames_received: IntCounter,
    pub parse_errors: IntCounter,
    pub subscription_failures: IntCounter,
    pub reconnects_scheduled: IntCounter,
    pub active_books: IntGauge,
}

impl FeedMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let frames_received =
            IntCounter::new("feed_frames_received_total", "Inbound frames received from the feed")?;
        let parse_errors =
            IntCounter::new("feed_parse_errors_total", "Inbound frames dropped as unparseable")?;
        let subscription_failures = IntCounter::new(
            "feed_subscription_failures_total",
            "Subscribe/unsubscribe requests rejected by the feed",
        )?;
        let reconnects_scheduled =
            IntCounter::new("feed_reconnects_scheduled_total", "Reconnect attempts scheduled")?;
        let active_books = IntGauge::new("feed_active_books", "Order books currently reconstructed")?;

        registry.register(Box::new(frames_received.clone()))?;
        registry.register(Box::new(parse_errors.clone()))?;
        registry.register(Box::new(subscription_failures.clone()))?;
        registry.register(Box::new(reconnects_scheduled.clone()))?;
        registry.register(Box::new(active_books.clone()))?;

        Ok(Self {
            registry,
            frames_received,
            parse_errors,
            subscription_failures,
            reconnects_scheduled,
            active_books,
        })
    }

    /// Render all metrics in the Prometheus text format
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| FeedError::MetricsError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_counters() {
        let metrics = FeedMetrics::new().unwrap();
        metrics.frames_received.inc();
        metrics.active_books.set(3);

        let text = metrics.render().unwrap();
        assert!(text.contains("feed_frames_received_total 1"));
        assert!(text.contains("feed_active_books 3"));
    }
}
