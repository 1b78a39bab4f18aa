//! Cache Adapters
//!
//! - [`MemoryCache`]: in-process [`CacheStore`](crate::application::ports::CacheStore)
//!   with lazy expiry plus one periodic sweep
//! - [`CacheWriter`]: bounded, non-blocking write path from the hot loop

mod memory;
mod writer;

pub use memory::MemoryCache;
pub use writer::{CacheWriter, DEFAULT_TTL, ohlcv_key};
