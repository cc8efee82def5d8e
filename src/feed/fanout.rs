//! Listener fan-out per channel kind

use std::collections::HashMap;
use std::sync::Arc;

use super::FeedEvent;
use crate::parser::ChannelKind;

/// Callback invoked for every event of the kind it was registered for
pub type Listener = Arc<dyn Fn(&FeedEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Registered listeners, in registration order per kind
#[derive(Default)]
pub struct EventFanout {
    next_id: u64,
    listeners: HashMap<ChannelKind, Vec<(ListenerId, Listener)>>,
}

impl EventFanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, kind: ChannelKind, listener: Listener) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.listeners.entry(kind).or_default().push((id, listener));
        id
    }

    /// Remove a listener, handing it back so the caller controls where it is dropped
    pub fn remove(&mut self, id: ListenerId) -> Option<Listener> {
        for listeners in self.listeners.values_mut() {
            if let Some(pos) = listeners.iter().position(|(lid, _)| *lid == id) {
                return Some(listeners.remove(pos).1);
            }
        }
        None
    }

    /// Copy of the current listener set for one dispatch pass
    pub fn snapshot(&self, kind: ChannelKind) -> Vec<Listener> {
        self.listeners
            .get(&kind)
            .map(|listeners| listeners.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default()
    }

    /// Remove every listener; ids keep counting so stale handles never match new listeners
    pub fn drain(&mut self) -> Vec<Listener> {
        self.listeners
            .drain()
            .flat_map(|(_, listeners)| listeners.into_iter().map(|(_, l)| l))
            .collect()
    }

    pub fn len(&self, kind: ChannelKind) -> usize {
        self.listeners.get(&kind).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.values().all(Vec::is_empty)
    }
}

/// Deliver every event to every listener of the pass
pub fn dispatch(listeners: &[Listener], events: &[FeedEvent]) {
    for event in events {
        for listener in listeners {
            listener(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::TickerSnapshot;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ticker_event() -> FeedEvent {
        FeedEvent::Ticker(TickerSnapshot {
            symbol: "BTC/USD".to_string(),
            ..Default::default()
        })
    }

    fn counter(count: &Arc<AtomicUsize>) -> Listener {
        let count = Arc::clone(count);
        Arc::new(move |_: &FeedEvent| {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_snapshot_is_scoped_to_kind() {
        let mut fanout = EventFanout::new();
        let ticker_hits = Arc::new(AtomicUsize::new(0));
        let book_hits = Arc::new(AtomicUsize::new(0));
        fanout.add(ChannelKind::Ticker, counter(&ticker_hits));
        fanout.add(ChannelKind::Ticker, counter(&ticker_hits));
        fanout.add(ChannelKind::Book, counter(&book_hits));

        dispatch(&fanout.snapshot(ChannelKind::Ticker), &[ticker_event()]);

        assert_eq!(ticker_hits.load(Ordering::SeqCst), 2);
        assert_eq!(book_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_removed_listener_stops_receiving() {
        let mut fanout = EventFanout::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let id = fanout.add(ChannelKind::Ticker, counter(&hits));
        let pass = fanout.snapshot(ChannelKind::Ticker);

        assert!(fanout.remove(id).is_some());
        assert!(fanout.remove(id).is_none());
        assert!(fanout.is_empty());

        // A pass captured before removal still delivers
        dispatch(&pass, &[ticker_event()]);
        dispatch(&fanout.snapshot(ChannelKind::Ticker), &[ticker_event()]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_ids_not_reused_after_drain() {
        let mut fanout = EventFanout::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let stale = fanout.add(ChannelKind::Book, counter(&hits));

        assert_eq!(fanout.drain().len(), 1);
        assert!(fanout.is_empty());

        let fresh = fanout.add(ChannelKind::Book, counter(&hits));
        assert_ne!(stale, fresh);
        assert!(fanout.remove(stale).is_none());
        assert_eq!(fanout.len(ChannelKind::Book), 1);
    }
}
