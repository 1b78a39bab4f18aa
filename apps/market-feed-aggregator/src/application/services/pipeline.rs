//! Processing Pipeline
//!
//! Runs each canonical record through the indicator calculator and the
//! aggregation engine exactly once, producing an [`EnrichedRecord`].
//!
//! # Concurrency
//!
//! State is sharded by `SymbolKey` hash. Each shard owns an
//! `IndicatorCalculator` and an `AggregationEngine` behind one mutex, so all
//! history and bucket mutation for a symbol is serialized, while different
//! symbols proceed in parallel.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};

use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::domain::aggregation::AggregationEngine;
use crate::domain::indicators::{IndicatorBundle, IndicatorCalculator};
use crate::domain::record::{AGGREGATION_TARGETS, CanonicalRecord, Resolution, SymbolKey};

/// Default number of lock shards.
pub const DEFAULT_SHARDS: usize = 16;

// =============================================================================
// Enriched Record
// =============================================================================

/// A canonical record plus its indicator bundle and any candles folded by it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedRecord {
    /// The record as received.
    #[serde(flatten)]
    pub record: CanonicalRecord,
    /// Indicator bundle; absent serializes as `{}`.
    #[serde(serialize_with = "bundle_or_empty")]
    pub indicators: Option<IndicatorBundle>,
    /// Higher-timeframe candles completed by this record.
    pub aggregations: BTreeMap<Resolution, CanonicalRecord>,
}

fn bundle_or_empty<S: Serializer>(
    bundle: &Option<IndicatorBundle>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match bundle {
        Some(bundle) => bundle.serialize(serializer),
        None => serde_json::Map::new().serialize(serializer),
    }
}

impl EnrichedRecord {
    /// Wrap a record that bypasses enrichment.
    #[must_use]
    pub const fn passthrough(record: CanonicalRecord) -> Self {
        Self {
            record,
            indicators: None,
            aggregations: BTreeMap::new(),
        }
    }

    /// JSON form with every indicator.
    #[must_use]
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    /// `full`, as returned by [`Self::to_json`], with the indicator object
    /// restricted to `names`. Only the indicator object is rebuilt.
    ///
    /// An empty set keeps every indicator.
    #[must_use]
    pub fn restrict_indicators(&self, full: &Value, names: &BTreeSet<String>) -> Value {
        let mut value = full.clone();
        if let (Some(bundle), Value::Object(map)) = (&self.indicators, &mut value) {
            map.insert(
                "indicators".to_string(),
                bundle.to_filtered_json(names.iter().map(String::as_str)),
            );
        }
        value
    }

    /// JSON form with the indicator object restricted to `names`.
    ///
    /// An empty set keeps every indicator.
    #[must_use]
    pub fn to_json_filtered(&self, names: &BTreeSet<String>) -> Value {
        self.restrict_indicators(&self.to_json(), names)
    }
}

// =============================================================================
// Pipeline
// =============================================================================

#[derive(Debug, Default)]
struct Shard {
    indicators: IndicatorCalculator,
    aggregation: AggregationEngine,
}

/// Sharded owner of all rolling history and aggregation buckets.
#[derive(Debug)]
pub struct ProcessingPipeline {
    shards: Vec<Mutex<Shard>>,
}

impl Default for ProcessingPipeline {
    fn default() -> Self {
        Self::new(DEFAULT_SHARDS)
    }
}

impl ProcessingPipeline {
    /// Create a pipeline with `shards` lock shards (at least one).
    #[must_use]
    pub fn new(shards: usize) -> Self {
        Self {
            shards: (0..shards.max(1)).map(|_| Mutex::new(Shard::default())).collect(),
        }
    }

    fn shard(&self, key: &SymbolKey) -> &Mutex<Shard> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = usize::try_from(hasher.finish() % self.shards.len() as u64).unwrap_or(0);
        &self.shards[index]
    }

    /// Enrich one record.
    ///
    /// Probability points pass through untouched. Everything else is added
    /// to history; 1-minute records also feed every aggregation target.
    #[must_use]
    pub fn process(&self, record: &CanonicalRecord) -> EnrichedRecord {
        if record.is_point() {
            return EnrichedRecord::passthrough(record.clone());
        }

        let key = record.key();
        let mut shard = self.shard(&key).lock();
        shard.indicators.add_data(&key, record.clone());

        let mut aggregations = BTreeMap::new();
        if record.resolution == Resolution::OneMinute {
            for target in &AGGREGATION_TARGETS {
                if let Some(candle) = shard.aggregation.aggregate(record, target) {
                    aggregations.insert(target.clone(), candle);
                }
            }
        }

        let indicators = shard.indicators.calculate_all(&key);
        drop(shard);

        EnrichedRecord {
            record: record.clone(),
            indicators,
            aggregations,
        }
    }

    /// Stored records for a symbol, most recent last.
    ///
    /// Aggregation targets read folded candles; any other resolution reads
    /// the rolling history filtered to that resolution.
    #[must_use]
    pub fn historical_data(
        &self,
        key: &SymbolKey,
        resolution: &Resolution,
        limit: usize,
    ) -> Vec<CanonicalRecord> {
        let shard = self.shard(key).lock();
        if resolution.aggregation_factor().is_some() {
            return shard.aggregation.candles(key, resolution, limit);
        }

        let matching: Vec<CanonicalRecord> = shard
            .indicators
            .history(key, usize::MAX)
            .into_iter()
            .filter(|r| &r.resolution == resolution)
            .collect();
        drop(shard);

        let skip = matching.len().saturating_sub(limit);
        matching.into_iter().skip(skip).collect()
    }

    /// Current indicator bundle for a symbol.
    #[must_use]
    pub fn indicators(&self, key: &SymbolKey) -> Option<IndicatorBundle> {
        self.shard(key).lock().indicators.calculate_all(key)
    }

    /// Every symbol with history.
    #[must_use]
    pub fn symbols(&self) -> BTreeSet<SymbolKey> {
        self.shards
            .iter()
            .flat_map(|shard| shard.lock().indicators.symbols().cloned().collect::<Vec<_>>())
            .collect()
    }

    /// Drop all history and buckets.
    pub fn clear(&self) {
        for shard in &self.shards {
            let mut shard = shard.lock();
            shard.indicators.clear();
            shard.aggregation.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn minute(symbol: &str, i: i64, close: f64) -> CanonicalRecord {
        CanonicalRecord {
            symbol: symbol.to_string(),
            exchange: "binance".to_string(),
            timestamp: i * 60_000,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 2.0,
            resolution: Resolution::OneMinute,
            source: "binance_futures".to_string(),
            aggregated_from: None,
            raw: Value::Null,
        }
    }

    #[test]
    fn empty_indicators_serialize_as_object() {
        let pipeline = ProcessingPipeline::default();
        let enriched = pipeline.process(&minute("BTCUSDT", 0, 10.0));

        let json = serde_json::to_value(&enriched).unwrap();
        assert_eq!(json["indicators"], serde_json::json!({}));
        assert_eq!(json["symbol"], "BTCUSDT");
        assert_eq!(json["aggregations"], serde_json::json!({}));
    }

    #[test]
    fn five_minute_candle_appears_on_fifth_record() {
        let pipeline = ProcessingPipeline::default();
        let mut last = None;
        for (i, close) in [10.0, 11.0, 12.0, 13.0, 14.0].into_iter().enumerate() {
            last = Some(pipeline.process(&minute("BTCUSDT", i64::try_from(i).unwrap(), close)));
        }
        let enriched = last.unwrap();

        let candle = &enriched.aggregations[&Resolution::FiveMinutes];
        assert_eq!(candle.open, 10.0);
        assert_eq!(candle.close, 14.0);
        assert_eq!(candle.volume, 10.0);
        assert_eq!(enriched.aggregations.len(), 1);

        let json = serde_json::to_value(&enriched).unwrap();
        assert_eq!(json["aggregations"]["5m"]["aggregatedFrom"], 5);
    }

    #[test]
    fn points_pass_through() {
        let pipeline = ProcessingPipeline::default();
        let point = CanonicalRecord::point(
            "polymarket",
            "POLY:m:1".to_string(),
            0,
            0.4,
            1.0,
            "polymarket".to_string(),
            Value::Null,
        );

        let enriched = pipeline.process(&point);

        assert!(enriched.indicators.is_none());
        assert!(pipeline.symbols().is_empty());
    }

    #[test]
    fn historical_data_by_resolution() {
        let pipeline = ProcessingPipeline::default();
        for i in 0..12 {
            let _ = pipeline.process(&minute("ETHUSDT", i, 5.0));
        }
        let key = minute("ETHUSDT", 0, 0.0).key();

        let minutes = pipeline.historical_data(&key, &Resolution::OneMinute, 5);
        assert_eq!(minutes.len(), 5);
        assert_eq!(minutes[4].timestamp, 11 * 60_000);

        let fives = pipeline.historical_data(&key, &Resolution::FiveMinutes, 100);
        assert_eq!(fives.len(), 2);

        assert!(pipeline.historical_data(&key, &Resolution::OneHour, 10).is_empty());
        assert!(
            pipeline
                .historical_data(&minute("XRPUSDT", 0, 0.0).key(), &Resolution::OneMinute, 10)
                .is_empty()
        );
    }

    #[test]
    fn retained_aggregates_hold_no_raw_payloads() {
        let pipeline = ProcessingPipeline::default();
        let mut emitted = Vec::new();
        for i in 0..50 {
            let mut record = minute("SOLUSDT", i, 20.0);
            record.raw = serde_json::json!({"payload": "x".repeat(1024)});
            let enriched = pipeline.process(&record);
            emitted.extend(enriched.aggregations.get(&Resolution::FiveMinutes).cloned());
        }
        let key = minute("SOLUSDT", 0, 0.0).key();

        assert_eq!(emitted.len(), 10);
        assert_eq!(emitted[0].raw.as_array().unwrap().len(), 5);
        assert!(emitted[0].raw[0].get("raw").is_none());

        let retained = pipeline.historical_data(&key, &Resolution::FiveMinutes, 100);
        assert_eq!(retained.len(), 10);
        assert!(retained.iter().all(|candle| candle.raw.is_null()));
    }

    #[test]
    fn filtered_json_restricts_indicators() {
        let pipeline = ProcessingPipeline::default();
        let mut last = None;
        for i in 0..60 {
            last = Some(pipeline.process(&minute("BTCUSDT", i, 100.0)));
        }
        let enriched = last.unwrap();
        let names: BTreeSet<String> = ["rsi".to_string()].into();

        let json = enriched.to_json_filtered(&names);
        let indicators = json["indicators"].as_object().unwrap();
        assert_eq!(indicators.len(), 1);
        assert!(indicators.contains_key("rsi"));
    }

    #[test]
    fn concurrent_updates_same_symbol_are_serialized() {
        let pipeline = Arc::new(ProcessingPipeline::new(4));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let p = Arc::clone(&pipeline);
                std::thread::spawn(move || {
                    for i in 0..25 {
                        let _ = p.process(&minute("BTCUSDT", t * 25 + i, 1.0));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let key = minute("BTCUSDT", 0, 0.0).key();
        assert_eq!(pipeline.historical_data(&key, &Resolution::OneMinute, 1000).len(), 100);
        assert_eq!(pipeline.historical_data(&key, &Resolution::FiveMinutes, 1000).len(), 20);
    }

    #[test]
    fn clear_resets_state() {
        let pipeline = ProcessingPipeline::default();
        let _ = pipeline.process(&minute("BTCUSDT", 0, 1.0));
        pipeline.clear();
        assert!(pipeline.symbols().is_empty());
    }
}
