//! Aggregation Engine
//!
//! Folds 1-minute records into higher timeframes with a fixed-count
//! tumbling window per `(SymbolKey, Resolution)`.
//!
//! # Window semantics
//!
//! Windows advance by arrival count, not wall-clock alignment. A dropped or
//! delayed upstream bar shifts every later boundary for that symbol. Folding
//! assumes ordered, gap-free 1-minute input.
//!
//! # Memory
//!
//! Pending buckets hold OHLCV-only [`Bar`]s rather than full records. Only
//! the candle returned from a fold carries the bucket as its `raw` audit
//! trail; the copy kept for history queries has `raw = null`, so retained
//! memory stays proportional to the candle count.

use std::collections::{HashMap, VecDeque};

use serde::Serialize;
use serde_json::Value;

use crate::domain::record::{CanonicalRecord, Resolution, SymbolKey};

/// Default number of folded candles retained per key and resolution.
pub const DEFAULT_CANDLE_CAPACITY: usize = 1000;

type BucketKey = (SymbolKey, Resolution);

/// The OHLCV part of one bucketed 1-minute record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bar {
    /// Bar open time, milliseconds since the epoch.
    pub timestamp: i64,
    /// Open price.
    pub open: f64,
    /// High price.
    pub high: f64,
    /// Low price.
    pub low: f64,
    /// Close price.
    pub close: f64,
    /// Traded volume.
    pub volume: f64,
}

impl From<&CanonicalRecord> for Bar {
    fn from(record: &CanonicalRecord) -> Self {
        Self {
            timestamp: record.timestamp,
            open: record.open,
            high: record.high,
            low: record.low,
            close: record.close,
            volume: record.volume,
        }
    }
}

/// Per-symbol accumulation buckets and folded candle history.
#[derive(Debug)]
pub struct AggregationEngine {
    buckets: HashMap<BucketKey, Vec<Bar>>,
    candles: HashMap<BucketKey, VecDeque<CanonicalRecord>>,
    candle_capacity: usize,
}

impl Default for AggregationEngine {
    fn default() -> Self {
        Self::new(DEFAULT_CANDLE_CAPACITY)
    }
}

impl AggregationEngine {
    /// Create an engine retaining up to `candle_capacity` folded candles
    /// per key and resolution.
    #[must_use]
    pub fn new(candle_capacity: usize) -> Self {
        Self {
            buckets: HashMap::new(),
            candles: HashMap::new(),
            candle_capacity: candle_capacity.max(1),
        }
    }

    /// Append a 1-minute record to the `target` bucket and fold when full.
    ///
    /// Returns the folded candle, or `None` while the bucket is filling.
    /// Records that are not 1-minute, and targets without a factor, never
    /// produce output.
    pub fn aggregate(
        &mut self,
        record: &CanonicalRecord,
        target: &Resolution,
    ) -> Option<CanonicalRecord> {
        if record.resolution != Resolution::OneMinute {
            return None;
        }
        let factor = target.aggregation_factor()?;

        let key = (record.key(), target.clone());
        let bucket = self.buckets.entry(key.clone()).or_default();
        bucket.push(Bar::from(record));

        if bucket.len() < factor {
            return None;
        }

        let folded = fold(record, bucket, target);
        bucket.clear();
        let mut candle = folded?;

        let audit = std::mem::take(&mut candle.raw);
        let history = self.candles.entry(key).or_default();
        history.push_back(candle.clone());
        while history.len() > self.candle_capacity {
            history.pop_front();
        }

        candle.raw = audit;
        Some(candle)
    }

    /// Folded candles for a key, most recent last, at most `limit`. Their
    /// `raw` is `null`.
    #[must_use]
    pub fn candles(
        &self,
        key: &SymbolKey,
        resolution: &Resolution,
        limit: usize,
    ) -> Vec<CanonicalRecord> {
        self.candles
            .get(&(key.clone(), resolution.clone()))
            .map(|history| {
                let skip = history.len().saturating_sub(limit);
                history.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default()
    }

    /// Number of records waiting in a bucket.
    #[must_use]
    pub fn pending(&self, key: &SymbolKey, resolution: &Resolution) -> usize {
        self.buckets
            .get(&(key.clone(), resolution.clone()))
            .map_or(0, Vec::len)
    }

    /// Drop all buckets and candles.
    pub fn clear(&mut self) {
        self.buckets.clear();
        self.candles.clear();
    }
}

/// Fold a bucket into one candle at `target` resolution.
///
/// Open and timestamp come from the first bar, close from the last, high
/// and low are the extremes, volume is summed. Symbol, exchange and source
/// come from `latest`. The bars become the candle's `raw` payload.
#[must_use]
pub fn fold(latest: &CanonicalRecord, bucket: &[Bar], target: &Resolution) -> Option<CanonicalRecord> {
    let first = bucket.first()?;
    let last = bucket.last()?;

    let (high, low, volume) = bucket.iter().fold(
        (f64::NEG_INFINITY, f64::INFINITY, 0.0),
        |(high, low, volume), r| (high.max(r.high), low.min(r.low), volume + r.volume),
    );

    Some(CanonicalRecord {
        symbol: latest.symbol.clone(),
        exchange: latest.exchange.clone(),
        timestamp: first.timestamp,
        open: first.open,
        high,
        low,
        close: last.close,
        volume,
        resolution: target.clone(),
        source: latest.source.clone(),
        aggregated_from: Some(bucket.len()),
        raw: serde_json::to_value(bucket).unwrap_or(Value::Null),
    })
}

// =============================================================================
// Tests
// =============================================================================
