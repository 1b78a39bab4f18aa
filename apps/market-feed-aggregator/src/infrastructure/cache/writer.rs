//! Best-effort cache writer.
//!
//! The hot path hands records to [`CacheWriter::write`], which never blocks:
//! it enqueues on a bounded channel and drops the write when the queue is
//! full. A single task drains the queue into the [`CacheStore`]. Store
//! failures are logged and counted, never propagated.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::application::ports::CacheStore;
use crate::domain::record::CanonicalRecord;
use crate::infrastructure::metrics;

/// Default TTL of OHLCV entries.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Cache key of a record: `ohlcv:{exchange}:{symbol}:{timestamp}`.
#[must_use]
pub fn ohlcv_key(record: &CanonicalRecord) -> String {
    format!("ohlcv:{}:{}:{}", record.exchange, record.symbol, record.timestamp)
}

/// Handle for enqueueing cache writes.
#[derive(Debug, Clone)]
pub struct CacheWriter {
    tx: mpsc::Sender<CanonicalRecord>,
}

impl CacheWriter {
    /// Spawn the drain task over `store` and return the writer handle.
    ///
    /// The task ends once every writer handle is dropped and the queue drains.
    pub fn spawn(store: Arc<dyn CacheStore>, capacity: usize, ttl: Duration) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<CanonicalRecord>(capacity.max(1));

        let handle = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                let key = ohlcv_key(&record);
                let value = match serde_json::to_value(&record) {
                    Ok(value) => value,
                    Err(e) => {
                        tracing::warn!(key, error = %e, "Cache encode failed");
                        metrics::record_cache_write_failure();
                        continue;
                    }
                };
                if let Err(e) = store.set(&key, value, ttl).await {
                    tracing::debug!(key, error = %e, "Cache write failed");
                    metrics::record_cache_write_failure();
                }
            }
            tracing::debug!("Cache writer stopped");
        });

        (Self { tx }, handle)
    }

    /// Enqueue a write. Returns `false` when it was dropped.
    pub fn write(&self, record: &CanonicalRecord) -> bool {
        match self.tx.try_send(record.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                metrics::record_cache_write_dropped();
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                metrics::record_cache_write_failure();
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{CacheError, MockCacheStore};
    use crate::domain::record::Resolution;
    use crate::infrastructure::cache::MemoryCache;
    use serde_json::Value;

    fn record(timestamp: i64) -> CanonicalRecord {
        CanonicalRecord {
            symbol: "BTCUSDT".to_string(),
            exchange: "binance".to_string(),
            timestamp,
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 10.0,
            resolution: Resolution::OneMinute,
            source: "binance_futures".to_string(),
            aggregated_from: None,
            raw: Value::Null,
        }
    }

    #[test]
    fn key_format() {
        assert_eq!(ohlcv_key(&record(60_000)), "ohlcv:binance:BTCUSDT:60000");
    }

    #[tokio::test]
    async fn writes_reach_the_store() {
        let cache = MemoryCache::new();
        let (writer, handle) = CacheWriter::spawn(Arc::new(cache.clone()), 8, DEFAULT_TTL);

        assert!(writer.write(&record(1)));
        assert!(writer.write(&record(2)));
        drop(writer);
        handle.await.unwrap();

        let stored = cache.scan_prefix("ohlcv:binance:BTCUSDT:").await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].1["close"], 1.5);
    }

    #[tokio::test]
    async fn store_failures_are_swallowed() {
        let mut store = MockCacheStore::new();
        store
            .expect_set()
            .times(2)
            .returning(|_, _, _| Err(CacheError::Unavailable("connection refused".to_string())));

        let (writer, handle) = CacheWriter::spawn(Arc::new(store), 8, DEFAULT_TTL);
        assert!(writer.write(&record(1)));
        assert!(writer.write(&record(2)));
        drop(writer);

        handle.await.unwrap();
    }

    #[tokio::test]
    async fn full_queue_drops() {
        let (tx, _rx) = mpsc::channel(1);
        let writer = CacheWriter { tx };

        assert!(writer.write(&record(1)));
        assert!(!writer.write(&record(2)));
    }
}
