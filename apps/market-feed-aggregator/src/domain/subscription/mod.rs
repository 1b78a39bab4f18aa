//! Subscription Management
//!
//! Tracks which `SymbolKey`s, and which indicators, each downstream
//! subscriber wants.
//!
//! # Design
//!
//! Matching a record is one set-membership check per subscriber. A
//! subscriber entry exists only while its symbol set is non-empty.

use std::collections::{BTreeSet, HashMap, HashSet};

use parking_lot::RwLock;

use crate::domain::record::SymbolKey;

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for a downstream subscriber (one WebSocket client).
pub type SubscriberId = String;

/// One subscriber's interest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subscription {
    /// Subscribed symbols.
    pub symbols: HashSet<SymbolKey>,
    /// Requested indicator names; empty means all.
    pub indicators: BTreeSet<String>,
}

// =============================================================================
// Subscription Manager
// =============================================================================

/// Thread-safe registry of subscriber interest.
///
/// # Example
///
/// ```rust
/// use market_feed_aggregator::domain::normalize::parse_key;
/// use market_feed_aggregator::domain::subscription::SubscriptionManager;
///
/// let manager = SubscriptionManager::new();
/// let btc = parse_key("binance:BTCUSDT").unwrap();
///
/// assert!(manager.subscribe("a", &btc, &[]));
/// // Already subscribed
/// assert!(!manager.subscribe("a", &btc, &[]));
///
/// assert!(manager.unsubscribe("a", Some(&btc)));
/// assert_eq!(manager.subscriber_count(), 0);
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    subscribers: RwLock<HashMap<SubscriberId, Subscription>>,
}

impl SubscriptionManager {
    /// Create a new subscription manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a symbol (and indicator names) to a subscriber. Idempotent.
    ///
    /// Returns `true` when the symbol was not yet subscribed.
    pub fn subscribe(&self, subscriber: &str, symbol: &SymbolKey, indicators: &[String]) -> bool {
        let mut subscribers = self.subscribers.write();
        let entry = subscribers.entry(subscriber.to_string()).or_default();
        entry.indicators.extend(indicators.iter().cloned());
        entry.symbols.insert(symbol.clone())
    }

    /// Remove one symbol, or every symbol when `symbol` is `None`.
    ///
    /// Removing the last symbol removes the subscriber entry. Idempotent;
    /// returns `true` when something was removed.
    pub fn unsubscribe(&self, subscriber: &str, symbol: Option<&SymbolKey>) -> bool {
        let mut subscribers = self.subscribers.write();
        let Some(symbol) = symbol else {
            return subscribers.remove(subscriber).is_some();
        };
        let Some(entry) = subscribers.get_mut(subscriber) else {
            return false;
        };
        let removed = entry.symbols.remove(symbol);
        if entry.symbols.is_empty() {
            subscribers.remove(subscriber);
        }
        removed
    }

    /// Subscribers interested in `symbol`, with their indicator filters.
    #[must_use]
    pub fn matching(&self, symbol: &SymbolKey) -> Vec<(SubscriberId, BTreeSet<String>)> {
        self.subscribers
            .read()
            .iter()
            .filter(|(_, sub)| sub.symbols.contains(symbol))
            .map(|(id, sub)| (id.clone(), sub.indicators.clone()))
            .collect()
    }

    /// A subscriber's current subscription.
    #[must_use]
    pub fn subscription(&self, subscriber: &str) -> Option<Subscription> {
        self.subscribers.read().get(subscriber).cloned()
    }

    /// Number of subscribers with at least one symbol.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn key(symbol: &str) -> SymbolKey {
        SymbolKey::new("binance", symbol)
    }

    #[test]
    fn subscribe_is_idempotent() {
        let manager = SubscriptionManager::new();

        assert!(manager.subscribe("a", &key("BTCUSDT"), &[]));
        assert!(!manager.subscribe("a", &key("BTCUSDT"), &[]));

        assert_eq!(manager.subscription("a").unwrap().symbols.len(), 1);
        assert!(manager.unsubscribe("a", Some(&key("BTCUSDT"))));
        assert!(!manager.unsubscribe("a", Some(&key("BTCUSDT"))));
    }

    #[test]
    fn indicators_accumulate() {
        let manager = SubscriptionManager::new();
        manager.subscribe("a", &key("BTCUSDT"), &["rsi".to_string()]);
        manager.subscribe("a", &key("ETHUSDT"), &["macd".to_string()]);

        let sub = manager.subscription("a").unwrap();
        assert_eq!(sub.symbols.len(), 2);
        assert!(sub.indicators.contains("rsi"));
        assert!(sub.indicators.contains("macd"));
    }

    #[test]
    fn unsubscribe_leaves_other_subscribers() {
        let manager = SubscriptionManager::new();
        manager.subscribe("a", &key("BTCUSDT"), &[]);
        manager.subscribe("b", &key("BTCUSDT"), &[]);

        manager.unsubscribe("a", Some(&key("BTCUSDT")));

        let matches = manager.matching(&key("BTCUSDT"));
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].0, "b");
    }

    #[test]
    fn last_symbol_removes_entry() {
        let manager = SubscriptionManager::new();
        manager.subscribe("a", &key("BTCUSDT"), &[]);
        manager.subscribe("a", &key("ETHUSDT"), &[]);

        manager.unsubscribe("a", Some(&key("BTCUSDT")));
        assert!(manager.subscription("a").is_some());

        manager.unsubscribe("a", Some(&key("ETHUSDT")));
        assert!(manager.subscription("a").is_none());
        assert_eq!(manager.subscriber_count(), 0);
    }

    #[test]
    fn unsubscribe_all() {
        let manager = SubscriptionManager::new();
        manager.subscribe("a", &key("BTCUSDT"), &[]);
        manager.subscribe("a", &key("ETHUSDT"), &[]);
        manager.subscribe("b", &key("ETHUSDT"), &[]);

        assert!(manager.unsubscribe("a", None));

        assert!(manager.subscription("a").is_none());
        assert!(manager.matching(&key("BTCUSDT")).is_empty());
        assert_eq!(manager.matching(&key("ETHUSDT")).len(), 1);
    }

    #[test]
    fn unknown_subscriber_is_a_no_op() {
        let manager = SubscriptionManager::new();
        manager.subscribe("a", &key("BTCUSDT"), &[]);

        assert!(!manager.unsubscribe("b", Some(&key("BTCUSDT"))));
        assert!(!manager.unsubscribe("b", None));
        assert_eq!(manager.subscriber_count(), 1);
    }

    #[test]
    fn matching_is_exact() {
        let manager = SubscriptionManager::new();
        manager.subscribe("a", &key("BTCUSDT"), &["rsi".to_string()]);
        manager.subscribe("b", &key("ETHUSDT"), &[]);
        manager.subscribe("c", &SymbolKey::new("bybit", "BTCUSDT"), &[]);

        let matches = manager.matching(&key("BTCUSDT"));

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].0, "a");
        assert!(matches[0].1.contains("rsi"));
    }

    #[test]
    fn concurrent_subscribe_and_disconnect() {
        use std::sync::Arc;
        use std::thread;

        let manager = Arc::new(SubscriptionManager::new());
        let handles: Vec<_> = (0..10)
            .map(|i| {
                let m = Arc::clone(&manager);
                thread::spawn(move || {
                    let id = format!("client-{i}");
                    m.subscribe(&id, &key(&format!("SYM{i}USDT")), &[]);
                    m.subscribe(&id, &key("SHAREDUSDT"), &[]);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(manager.subscriber_count(), 10);
        assert_eq!(manager.matching(&key("SHAREDUSDT")).len(), 10);

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let m = Arc::clone(&manager);
                thread::spawn(move || m.unsubscribe(&format!("client-{i}"), None))
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(manager.subscriber_count(), 0);
    }
}
