//! Subscription registry
//!
//! Reference-counts consumer interest per channel kind and symbol so that
//! many consumers share one upstream subscription. Only the first acquire
//! and the last release of a symbol need wire traffic.

use std::collections::{BTreeMap, HashMap};

use crate::parser::ChannelKind;

/// Outcome of registering interest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    /// First consumer; an upstream subscribe is needed
    First,
    /// Symbol already subscribed; holds the new consumer count
    Shared(usize),
}

/// Outcome of dropping interest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Last consumer gone; an upstream unsubscribe is needed
    Last,
    /// Other consumers remain; holds the remaining count
    Remaining(usize),
    /// Symbol was not subscribed
    NotSubscribed,
}

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    interest: HashMap<ChannelKind, BTreeMap<String, usize>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&mut self, kind: ChannelKind, symbol: &str) -> Acquire {
        let count = self
            .interest
            .entry(kind)
            .or_default()
            .entry(symbol.to_string())
            .or_insert(0);
        *count += 1;

        if *count == 1 {
            Acquire::First
        } else {
            Acquire::Shared(*count)
        }
    }

    pub fn release(&mut self, kind: ChannelKind, symbol: &str) -> Release {
        let Some(symbols) = self.interest.get_mut(&kind) else {
            return Release::NotSubscribed;
        };
        let Some(count) = symbols.get_mut(symbol) else {
            return Release::NotSubscribed;
        };

        *count = count.saturating_sub(1);
        if *count > 0 {
            return Release::Remaining(*count);
        }

        symbols.remove(symbol);
        if symbols.is_empty() {
            self.interest.remove(&kind);
        }
        Release::Last
    }

    pub fn is_interested(&self, kind: ChannelKind, symbol: &str) -> bool {
        self.consumers(kind, symbol) > 0
    }

    pub fn consumers(&self, kind: ChannelKind, symbol: &str) -> usize {
        self.interest
            .get(&kind)
            .and_then(|symbols| symbols.get(symbol))
            .copied()
            .unwrap_or(0)
    }

    /// Interest set for a channel kind, sorted
    pub fn symbols(&self, kind: ChannelKind) -> Vec<String> {
        self.interest
            .get(&kind)
            .map(|symbols| symbols.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Batched interest for replay after (re)connect, one entry per non-empty kind
    pub fn replay(&self) -> Vec<(ChannelKind, Vec<String>)> {
        ChannelKind::ALL
            .into_iter()
            .map(|kind| (kind, self.symbols(kind)))
            .filter(|(_, symbols)| !symbols.is_empty())
            .collect()
    }

    /// No symbol of any kind is subscribed
    pub fn is_empty(&self) -> bool {
        self.interest.is_empty()
    }

    pub fn clear(&mut self) {
        self.interest.clear();
    }
}
