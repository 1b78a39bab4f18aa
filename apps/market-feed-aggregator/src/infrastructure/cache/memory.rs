//! In-process TTL store.
//!
//! Entries live in a key-ordered map so prefix scans are range reads. A
//! second map ordered by expiry lets one sweep task drop expired entries
//! without scanning everything; `get` also checks expiry so a stale entry is
//! never returned between sweeps.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{CacheError, CacheStore};

struct Entry {
    value: Value,
    expires_at: Instant,
}

#[derive(Default)]
struct Inner {
    entries: BTreeMap<String, Entry>,
    expiry: BTreeSet<(Instant, String)>,
}

impl Inner {
    fn remove(&mut self, key: &str) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        self.expiry.remove(&(entry.expires_at, key.to_string()));
        Some(entry)
    }
}

/// [`CacheStore`] backed by process memory.
#[derive(Clone, Default)]
pub struct MemoryCache {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Drop every entry expired at `now`. Returns how many were dropped.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut inner = self.inner.lock();
        let mut removed = 0;
        while let Some((expires_at, key)) = inner.expiry.first().cloned() {
            if expires_at > now {
                break;
            }
            inner.expiry.pop_first();
            inner.entries.remove(&key);
            removed += 1;
        }
        removed
    }

    /// Spawn the periodic sweep task. It stops when `cancel` fires.
    #[must_use]
    pub fn spawn_sweeper(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = cache.sweep_at(Instant::now());
                        if removed > 0 {
                            tracing::debug!(removed, remaining = cache.len(), "Cache sweep");
                        }
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("entries", &self.len())
            .finish()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<bool, CacheError> {
        let expires_at = Instant::now() + ttl;
        let mut inner = self.inner.lock();
        inner.remove(key);
        inner.expiry.insert((expires_at, key.to_string()));
        inner.entries.insert(key.to_string(), Entry { value, expires_at });
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let mut inner = self.inner.lock();
        let expired = match inner.entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            inner.remove(key);
        }
        Ok(None)
    }

    async fn del(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.inner.lock().remove(key).is_some())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>, CacheError> {
        let now = Instant::now();
        let inner = self.inner.lock();
        Ok(inner
            .entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(_, entry)| entry.expires_at > now)
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect())
    }
}
