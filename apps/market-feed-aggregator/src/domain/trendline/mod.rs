//! Trendline Store
//!
//! Bounded per-symbol history of probability points from event-style
//! providers. These records never enter the candle pipeline.

use std::collections::{HashMap, VecDeque};

use serde::Serialize;

use crate::domain::record::{CanonicalRecord, SymbolKey};

/// Points retained per symbol.
pub const TRENDLINE_CAPACITY: usize = 500;

/// Trendline counts reported by health.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrendlineStats {
    /// Symbols with at least one point.
    pub total_symbols: usize,
    /// Points across all symbols.
    pub total_points: usize,
}

/// Per-symbol ring of probability points.
#[derive(Debug)]
pub struct TrendlineStore {
    points: HashMap<SymbolKey, VecDeque<CanonicalRecord>>,
    capacity: usize,
}

impl Default for TrendlineStore {
    fn default() -> Self {
        Self::new(TRENDLINE_CAPACITY)
    }
}

impl TrendlineStore {
    /// Create a store keeping at most `capacity` points per symbol.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            points: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append a point; records that are not points are ignored.
    pub fn add(&mut self, record: &CanonicalRecord) {
        if !record.is_point() {
            return;
        }
        let series = self.points.entry(record.key()).or_default();
        series.push_back(record.clone());
        while series.len() > self.capacity {
            series.pop_front();
        }
    }

    /// Last `limit` points for a symbol, most recent last.
    #[must_use]
    pub fn points(&self, key: &SymbolKey, limit: usize) -> Vec<CanonicalRecord> {
        self.points
            .get(key)
            .map(|series| {
                let skip = series.len().saturating_sub(limit);
                series.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default()
    }

    /// Symbols with points.
    pub fn symbols(&self) -> impl Iterator<Item = &SymbolKey> {
        self.points.keys()
    }

    /// Current counts.
    #[must_use]
    pub fn stats(&self) -> TrendlineStats {
        TrendlineStats {
            total_symbols: self.points.len(),
            total_points: self.points.values().map(VecDeque::len).sum(),
        }
    }

    /// Drop all points.
    pub fn clear(&mut self) {
        self.points.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn point(symbol: &str, ts: i64, p: f64) -> CanonicalRecord {
        CanonicalRecord::point(
            "polymarket",
            symbol.to_string(),
            ts,
            p,
            100.0,
            "polymarket".to_string(),
            Value::Null,
        )
    }

    #[test]
    fn keeps_points_per_symbol() {
        let mut store = TrendlineStore::default();
        store.add(&point("POLY:a:1", 1, 0.4));
        store.add(&point("POLY:a:1", 2, 0.5));
        store.add(&point("POLY:b:2", 1, 0.9));

        assert_eq!(
            store.stats(),
            TrendlineStats {
                total_symbols: 2,
                total_points: 3,
            }
        );
        let key = point("POLY:a:1", 0, 0.0).key();
        let points = store.points(&key, 10);
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].close, 0.5);
    }

    #[test]
    fn evicts_oldest() {
        let mut store = TrendlineStore::new(3);
        for ts in 0..5 {
            store.add(&point("POLY:a:1", ts, 0.5));
        }
        let key = point("POLY:a:1", 0, 0.0).key();
        let points = store.points(&key, 10);
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].timestamp, 2);
    }

    #[test]
    fn ignores_candles() {
        let mut store = TrendlineStore::default();
        let mut candle = point("POLY:a:1", 0, 0.5);
        candle.resolution = crate::domain::record::Resolution::OneMinute;
        store.add(&candle);
        assert_eq!(store.stats().total_points, 0);
    }
}
