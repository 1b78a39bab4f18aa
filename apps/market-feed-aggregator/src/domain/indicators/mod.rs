//! Indicator Calculator
//!
//! Owns the per-symbol [`RollingHistory`] of native-resolution records and
//! computes a fixed indicator bundle from it on every update.
//!
//! | Indicator | Parameters | Minimum bars |
//! |-----------|------------|--------------|
//! | SMA       | 14         | 14           |
//! | EMA       | 14         | 14           |
//! | RSI       | 14 (Wilder)| 15           |
//! | MACD      | 12/26/9    | 34           |
//! | Bollinger | 20, 2σ     | 20           |
//! | Stochastic| 14, 3      | 16           |
//! | ATR       | 14 (Wilder)| 15           |
//! | OBV       |            | 2            |
//!
//! No bundle is produced below [`MIN_HISTORY`] bars.

pub mod math;

use std::collections::{HashMap, VecDeque};

use serde::Serialize;
use serde_json::Value;

use crate::domain::record::{CanonicalRecord, SymbolKey};

/// Records retained per symbol.
pub const HISTORY_CAPACITY: usize = 1000;

/// Bars required before any indicator is computed.
pub const MIN_HISTORY: usize = 50;

const SMA_PERIOD: usize = 14;
const EMA_PERIOD: usize = 14;
const RSI_PERIOD: usize = 14;
const MACD_FAST: usize = 12;
const MACD_SLOW: usize = 26;
const MACD_SIGNAL: usize = 9;
const BB_PERIOD: usize = 20;
const BB_DEVIATIONS: f64 = 2.0;
const STOCH_PERIOD: usize = 14;
const STOCH_SIGNAL: usize = 3;
const ATR_PERIOD: usize = 14;

/// Indicator names accepted in subscriptions.
pub const INDICATOR_NAMES: [&str; 8] = ["sma", "ema", "rsi", "macd", "bb", "stoch", "atr", "obv"];

// =============================================================================
// Rolling History
// =============================================================================

/// Bounded, oldest-evicted-first buffer of records for one symbol.
#[derive(Debug, Clone)]
pub struct RollingHistory {
    records: VecDeque<CanonicalRecord>,
    capacity: usize,
}

impl RollingHistory {
    /// Create an empty history holding at most `capacity` records.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity.min(HISTORY_CAPACITY)),
            capacity,
        }
    }

    /// Append a record, evicting the oldest when full.
    pub fn push(&mut self, record: CanonicalRecord) {
        self.records.push_back(record);
        while self.records.len() > self.capacity {
            self.records.pop_front();
        }
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the history is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = &CanonicalRecord> {
        self.records.iter()
    }

    fn series(&self, field: impl Fn(&CanonicalRecord) -> f64) -> Vec<f64> {
        self.records.iter().map(field).collect()
    }
}

// =============================================================================
// Indicator Bundle
// =============================================================================

/// MACD output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Macd {
    /// MACD line.
    pub macd: f64,
    /// Signal line.
    pub signal: f64,
    /// Histogram.
    pub histogram: f64,
}

/// Bollinger band output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bands {
    /// Upper band.
    pub upper: f64,
    /// Middle band.
    pub middle: f64,
    /// Lower band.
    pub lower: f64,
}

/// Stochastic output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Stochastic {
    /// %K.
    pub k: f64,
    /// %D.
    pub d: f64,
}

/// Latest value of every indicator; `None` serializes as `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndicatorBundle {
    /// Simple moving average (14).
    pub sma: Option<f64>,
    /// Exponential moving average (14).
    pub ema: Option<f64>,
    /// Relative strength index (14).
    pub rsi: Option<f64>,
    /// MACD (12/26/9).
    pub macd: Option<Macd>,
    /// Bollinger bands (20, 2).
    pub bb: Option<Bands>,
    /// Stochastic (14, 3).
    pub stoch: Option<Stochastic>,
    /// Average true range (14).
    pub atr: Option<f64>,
    /// On-balance volume.
    pub obv: Option<f64>,
}

impl IndicatorBundle {
    /// Compute the bundle from a history, or `None` below [`MIN_HISTORY`].
    #[must_use]
    pub fn from_history(history: &RollingHistory) -> Option<Self> {
        if history.len() < MIN_HISTORY {
            return None;
        }

        let closes = history.series(|r| r.close);
        let highs = history.series(|r| r.high);
        let lows = history.series(|r| r.low);
        let volumes = history.series(|r| r.volume);

        Some(Self {
            sma: math::sma(&closes, SMA_PERIOD),
            ema: math::ema(&closes, EMA_PERIOD),
            rsi: math::rsi(&closes, RSI_PERIOD),
            macd: math::macd(&closes, MACD_FAST, MACD_SLOW, MACD_SIGNAL).map(|m| Macd {
                macd: m.macd,
                signal: m.signal,
                histogram: m.histogram,
            }),
            bb: math::bollinger(&closes, BB_PERIOD, BB_DEVIATIONS).map(|b| Bands {
                upper: b.upper,
                middle: b.middle,
                lower: b.lower,
            }),
            stoch: math::stochastic(&highs, &lows, &closes, STOCH_PERIOD, STOCH_SIGNAL)
                .map(|s| Stochastic { k: s.k, d: s.d }),
            atr: math::atr(&highs, &lows, &closes, ATR_PERIOD),
            obv: math::obv(&closes, &volumes),
        })
    }

    /// JSON object restricted to the named indicators.
    ///
    /// An empty name list keeps every indicator.
    #[must_use]
    pub fn to_filtered_json<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        let names: Vec<&str> = names.into_iter().collect();
        if let Value::Object(map) = &mut value
            && !names.is_empty()
        {
            map.retain(|key, _| names.contains(&key.as_str()));
        }
        value
    }
}

// =============================================================================
// Calculator
// =============================================================================

/// Per-symbol histories and indicator computation.
#[derive(Debug, Default)]
pub struct IndicatorCalculator {
    histories: HashMap<SymbolKey, RollingHistory>,
}

impl IndicatorCalculator {
    /// Create an empty calculator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record to a symbol's history.
    pub fn add_data(&mut self, key: &SymbolKey, record: CanonicalRecord) {
        self.histories
            .entry(key.clone())
            .or_insert_with(|| RollingHistory::new(HISTORY_CAPACITY))
            .push(record);
    }

    /// Indicator bundle for a symbol; `None` reads as `{}` downstream.
    #[must_use]
    pub fn calculate_all(&self, key: &SymbolKey) -> Option<IndicatorBundle> {
        self.histories.get(key).and_then(IndicatorBundle::from_history)
    }

    /// Last `limit` records of a symbol, most recent last.
    #[must_use]
    pub fn history(&self, key: &SymbolKey, limit: usize) -> Vec<CanonicalRecord> {
        self.histories
            .get(key)
            .map(|history| {
                let skip = history.len().saturating_sub(limit);
                history.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default()
    }

    /// Number of records stored for a symbol.
    #[must_use]
    pub fn history_len(&self, key: &SymbolKey) -> usize {
        self.histories.get(key).map_or(0, RollingHistory::len)
    }

    /// Symbols with history.
    pub fn symbols(&self) -> impl Iterator<Item = &SymbolKey> {
        self.histories.keys()
    }

    /// Drop every history.
    pub fn clear(&mut self) {
        self.histories.clear();
    }
}
