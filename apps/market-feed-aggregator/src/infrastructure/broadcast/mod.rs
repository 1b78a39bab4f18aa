//! Subscription Broadcaster
//!
//! Routes enriched records to the subscribers that asked for their symbol.
//!
//! # Architecture
//!
//! Each connected subscriber owns a bounded outbound queue. The broadcaster:
//! - runs every record through the [`ProcessingPipeline`] exactly once
//! - asks the [`SubscriptionManager`] for the subscribers watching its key
//! - serializes the enriched record once, plus once per distinct indicator
//!   filter among the matches
//! - `try_send`s one `ohlcv_update` per match, sharing the serialized data
//!
//! A full or closed queue is a delivery failure for that subscriber only. It
//! is logged and counted; the other subscribers are unaffected and the
//! ingestion path never waits on a slow client.

pub mod protocol;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::services::{EnrichedRecord, ProcessingPipeline};
use crate::domain::record::{CanonicalRecord, SymbolKey};
use crate::domain::subscription::{SubscriberId, SubscriptionManager};
use crate::infrastructure::metrics;

pub use protocol::{ClientMessage, ServerMessage};

// =============================================================================
// Statistics
// =============================================================================

/// Result of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    /// Subscribers the update was queued for.
    pub delivered: usize,
    /// Subscribers whose queue was full, closed or missing.
    pub failed: usize,
}

/// Lifetime counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    /// Connected subscribers.
    pub clients: usize,
    /// Records processed.
    pub records: u64,
    /// Updates queued.
    pub delivered: u64,
    /// Updates dropped.
    pub failed: u64,
}

// =============================================================================
// Broadcaster
// =============================================================================

/// Fan-out of enriched records to subscribers.
#[derive(Debug)]
pub struct SubscriptionBroadcaster {
    pipeline: Arc<ProcessingPipeline>,
    subscriptions: SubscriptionManager,
    clients: RwLock<HashMap<SubscriberId, mpsc::Sender<ServerMessage>>>,
    queue_capacity: usize,
    records: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl SubscriptionBroadcaster {
    /// Create a broadcaster over `pipeline`. Every subscriber gets an
    /// outbound queue of `queue_capacity` messages.
    #[must_use]
    pub fn new(pipeline: Arc<ProcessingPipeline>, queue_capacity: usize) -> Self {
        Self {
            pipeline,
            subscriptions: SubscriptionManager::new(),
            clients: RwLock::new(HashMap::new()),
            queue_capacity: queue_capacity.max(1),
            records: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// The pipeline records run through.
    #[must_use]
    pub fn pipeline(&self) -> &Arc<ProcessingPipeline> {
        &self.pipeline
    }

    /// Register a subscriber and return its id and outbound queue.
    pub fn register_client(&self) -> (SubscriberId, mpsc::Receiver<ServerMessage>) {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let count = {
            let mut clients = self.clients.write();
            clients.insert(id.clone(), tx);
            clients.len()
        };
        metrics::set_subscribers(count);
        tracing::debug!(client_id = %id, clients = count, "Subscriber connected");
        (id, rx)
    }

    /// Drop a subscriber and all of its subscriptions.
    pub fn remove_client(&self, id: &str) {
        self.subscriptions.unsubscribe(id, None);
        let count = {
            let mut clients = self.clients.write();
            clients.remove(id);
            clients.len()
        };
        metrics::set_subscribers(count);
        tracing::debug!(client_id = %id, clients = count, "Subscriber disconnected");
    }

    /// Add a symbol to a subscriber. Idempotent; indicator names accumulate.
    pub fn subscribe(&self, subscriber: &str, symbol: &SymbolKey, indicators: &[String]) {
        let added = self.subscriptions.subscribe(subscriber, symbol, indicators);
        tracing::debug!(client_id = %subscriber, symbol = %symbol, added, "Subscribed");
    }

    /// Remove one symbol, or every symbol when `symbol` is `None`.
    /// Removing the last symbol removes the subscription entry.
    pub fn unsubscribe(&self, subscriber: &str, symbol: Option<&SymbolKey>) {
        let removed = self.subscriptions.unsubscribe(subscriber, symbol);
        tracing::debug!(client_id = %subscriber, ?symbol, removed, "Unsubscribed");
    }

    /// Indicator filter of a subscriber, sorted.
    #[must_use]
    pub fn indicator_filter(&self, subscriber: &str) -> Vec<String> {
        self.subscriptions
            .subscription(subscriber)
            .map(|s| s.indicators.into_iter().collect())
            .unwrap_or_default()
    }

    /// Connected subscribers.
    #[must_use]
    pub fn get_client_count(&self) -> usize {
        self.clients.read().len()
    }

    /// Lifetime counters.
    #[must_use]
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            clients: self.get_client_count(),
            records: self.records.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    /// Enrich `record` once and queue it for every matching subscriber.
    pub fn broadcast(&self, record: &CanonicalRecord) -> BroadcastOutcome {
        let started = Instant::now();
        let enriched = self.pipeline.process(record);
        metrics::record_processing_duration(started.elapsed());
        for resolution in enriched.aggregations.keys() {
            metrics::record_aggregated(resolution.as_str());
        }
        self.records.fetch_add(1, Ordering::Relaxed);

        let outcome = self.deliver(&enriched);
        if outcome.delivered > 0 {
            metrics::record_delivered(outcome.delivered as u64);
        }
        self.delivered
            .fetch_add(outcome.delivered as u64, Ordering::Relaxed);
        self.failed.fetch_add(outcome.failed as u64, Ordering::Relaxed);
        outcome
    }

    fn deliver(&self, enriched: &EnrichedRecord) -> BroadcastOutcome {
        let key = enriched.record.key();
        let matching = self.subscriptions.matching(&key);
        if matching.is_empty() {
            return BroadcastOutcome::default();
        }

        let timestamp = chrono::Utc::now().timestamp_millis();
        let full = Arc::new(enriched.to_json());
        let mut filtered: HashMap<BTreeSet<String>, Arc<Value>> = HashMap::new();
        let clients = self.clients.read();
        let mut outcome = BroadcastOutcome::default();

        for (subscriber, indicators) in matching {
            let Some(tx) = clients.get(&subscriber) else {
                metrics::record_delivery_failure("unknown");
                outcome.failed += 1;
                continue;
            };
            let data = if indicators.is_empty() || enriched.indicators.is_none() {
                Arc::clone(&full)
            } else {
                let data = filtered
                    .entry(indicators)
                    .or_insert_with_key(|names| Arc::new(enriched.restrict_indicators(&full, names)));
                Arc::clone(data)
            };
            let message = ServerMessage::OhlcvUpdate { data, timestamp };
            match tx.try_send(message) {
                Ok(()) => outcome.delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(client_id = %subscriber, symbol = %key, "Subscriber queue full, dropping update");
                    metrics::record_delivery_failure("full");
                    outcome.failed += 1;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!(client_id = %subscriber, symbol = %key, "Subscriber queue closed");
                    metrics::record_delivery_failure("closed");
                    outcome.failed += 1;
                }
            }
        }
        outcome
    }

    /// Drain the orchestrator's record stream until it closes or `cancel`
    /// fires.
    pub async fn run(
        self: Arc<Self>,
        mut records: mpsc::Receiver<CanonicalRecord>,
        cancel: CancellationToken,
    ) {
        tracing::info!("Broadcaster started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                record = records.recv() => match record {
                    Some(record) => {
                        self.broadcast(&record);
                    }
                    None => break,
                },
            }
        }
        tracing::info!(records = self.records.load(Ordering::Relaxed), "Broadcaster stopped");
    }
}

/// Shared broadcaster reference.
pub type SharedBroadcaster = Arc<SubscriptionBroadcaster>;

// =============================================================================
// Tests
// =============================================================================
