//! Port Interfaces
//!
//! Contracts the core depends on, implemented by infrastructure adapters.
//!
//! ## Driven Ports (Outbound)
//!
//! - `CacheStore`: best-effort key/value store with TTL used as a durability
//!   side channel. The core keeps working memory-only when it is down.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

// =============================================================================
// Cache Store
// =============================================================================

/// Cache/store failure. Always non-fatal to the core.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// Store unreachable or refused the operation.
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// Key/value store with per-entry TTL.
///
/// No ordering or atomicity guarantees are required of implementations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Store `value` under `key` for `ttl`. Returns whether it was stored.
    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<bool, CacheError>;

    /// Fetch a live value.
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    /// Delete a key. Returns whether it existed.
    async fn del(&self, key: &str) -> Result<bool, CacheError>;

    /// Live entries whose key starts with `prefix`, ordered by key.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>, CacheError>;
}
