//! Canonical Market Records
//!
//! The single normalized candle/point shape every provider is mapped into,
//! plus the resolution tags and the `exchange:symbol` addressing key.
//!
//! Records are produced by the normalizer and never mutated afterwards.
//! Aggregated candles are new records that carry their source bucket in
//! `raw` as an audit trail.

use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// Resolution
// =============================================================================

/// Time resolution of a record.
///
/// Provider interval codes outside the canonical set are preserved verbatim
/// in [`Resolution::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Resolution {
    /// One minute.
    OneMinute,
    /// Five minutes.
    FiveMinutes,
    /// Fifteen minutes.
    FifteenMinutes,
    /// Thirty minutes.
    ThirtyMinutes,
    /// One hour.
    OneHour,
    /// Four hours.
    FourHours,
    /// One day.
    OneDay,
    /// One week.
    OneWeek,
    /// Point-in-time probability observation.
    Event,
    /// Unrecognized provider code, passed through unchanged.
    Other(String),
}

/// Higher timeframes every 1-minute record is folded into.
pub const AGGREGATION_TARGETS: [Resolution; 7] = [
    Resolution::FiveMinutes,
    Resolution::FifteenMinutes,
    Resolution::ThirtyMinutes,
    Resolution::OneHour,
    Resolution::FourHours,
    Resolution::OneDay,
    Resolution::OneWeek,
];

impl Resolution {
    /// Parse a canonical resolution code.
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        match code {
            "1m" => Self::OneMinute,
            "5m" => Self::FiveMinutes,
            "15m" => Self::FifteenMinutes,
            "30m" => Self::ThirtyMinutes,
            "1h" => Self::OneHour,
            "4h" => Self::FourHours,
            "1d" => Self::OneDay,
            "1w" => Self::OneWeek,
            "event" => Self::Event,
            other => Self::Other(other.to_string()),
        }
    }

    /// Canonical code for this resolution.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::OneMinute => "1m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::ThirtyMinutes => "30m",
            Self::OneHour => "1h",
            Self::FourHours => "4h",
            Self::OneDay => "1d",
            Self::OneWeek => "1w",
            Self::Event => "event",
            Self::Other(code) => code,
        }
    }

    /// Number of 1-minute records folded into one candle of this resolution.
    ///
    /// Returns `None` for resolutions that are not aggregation targets.
    #[must_use]
    pub const fn aggregation_factor(&self) -> Option<usize> {
        match self {
            Self::FiveMinutes => Some(5),
            Self::FifteenMinutes => Some(15),
            Self::ThirtyMinutes => Some(30),
            Self::OneHour => Some(60),
            Self::FourHours => Some(240),
            Self::OneDay => Some(1440),
            Self::OneWeek => Some(10_080),
            Self::OneMinute | Self::Event | Self::Other(_) => None,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Resolution {
    fn from(code: String) -> Self {
        Self::from_code(&code)
    }
}

impl From<Resolution> for String {
    fn from(resolution: Resolution) -> Self {
        resolution.as_str().to_string()
    }
}

// =============================================================================
// Symbol Key
// =============================================================================

/// `exchange:symbol`, the addressing unit for history, caching and routing.
///
/// Keys are built by the normalizer (or derived from a normalized record);
/// there is no public constructor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolKey {
    exchange: String,
    symbol: String,
}

impl SymbolKey {
    pub(crate) fn new(exchange: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            symbol: symbol.into(),
        }
    }

    /// Exchange component.
    #[must_use]
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Symbol component.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }
}

impl fmt::Display for SymbolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.exchange, self.symbol)
    }
}

impl Serialize for SymbolKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// =============================================================================
// Canonical Record
// =============================================================================

/// Normalized OHLCV record.
///
/// For probability sources (`resolution == Event`) all four prices carry the
/// probability, which is clamped to `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalRecord {
    /// Normalized symbol.
    pub symbol: String,
    /// Exchange name.
    pub exchange: String,
    /// Bar open time, milliseconds since the Unix epoch (UTC).
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
    /// Record resolution.
    pub resolution: Resolution,
    /// Upstream source tag (e.g. `binance_futures`, `alpaca_2`).
    pub source: String,
    /// Number of 1-minute records folded into this candle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregated_from: Option<usize>,
    /// Opaque upstream payload.
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl CanonicalRecord {
    /// Build a probability point. All four prices carry the probability.
    pub(crate) fn point(
        exchange: &str,
        symbol: String,
        timestamp: i64,
        probability: f64,
        volume: f64,
        source: String,
        raw: serde_json::Value,
    ) -> Self {
        let p = if probability.is_finite() {
            probability.clamp(0.0, 1.0)
        } else {
            0.0
        };

        Self {
            symbol,
            exchange: exchange.to_string(),
            timestamp,
            open: p,
            high: p,
            low: p,
            close: p,
            volume: volume.max(0.0),
            resolution: Resolution::Event,
            source,
            aggregated_from: None,
            raw,
        }
    }

    /// Routing key for this record.
    #[must_use]
    pub fn key(&self) -> SymbolKey {
        SymbolKey::new(self.exchange.as_str(), self.symbol.as_str())
    }

    /// Check `low <= open, close <= high` and `volume >= 0`.
    ///
    /// Violations are tolerated by the pipeline; this is used for
    /// accounting, not rejection.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let finite = [self.open, self.high, self.low, self.close, self.volume]
            .iter()
            .all(|v| v.is_finite());

        finite
            && self.low <= self.high
            && (self.low..=self.high).contains(&self.open)
            && (self.low..=self.high).contains(&self.close)
            && self.volume >= 0.0
    }

    /// Whether this record is a probability point.
    #[must_use]
    pub fn is_point(&self) -> bool {
        self.resolution == Resolution::Event
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn bar(open: f64, high: f64, low: f64, close: f64, volume: f64) -> CanonicalRecord {
        CanonicalRecord {
            symbol: "BTCUSDT".to_string(),
            exchange: "binance".to_string(),
            timestamp: 1_700_000_000_000,
            open,
            high,
            low,
            close,
            volume,
            resolution: Resolution::OneMinute,
            source: "binance_futures".to_string(),
            aggregated_from: None,
            raw: serde_json::Value::Null,
        }
    }

    #[test]
    fn resolution_codes_round_trip() {
        for res in AGGREGATION_TARGETS {
            assert_eq!(Resolution::from_code(res.as_str()), res);
        }
        assert_eq!(Resolution::from_code("1m"), Resolution::OneMinute);
        assert_eq!(Resolution::from_code("event"), Resolution::Event);
    }

    #[test]
    fn unknown_resolution_passes_through() {
        let res = Resolution::from_code("24h");
        assert_eq!(res, Resolution::Other("24h".to_string()));
        assert_eq!(res.as_str(), "24h");
        assert!(res.aggregation_factor().is_none());
    }

    #[test]
    fn aggregation_factors() {
        assert_eq!(Resolution::FiveMinutes.aggregation_factor(), Some(5));
        assert_eq!(Resolution::OneHour.aggregation_factor(), Some(60));
        assert_eq!(Resolution::OneDay.aggregation_factor(), Some(1440));
        assert_eq!(Resolution::OneWeek.aggregation_factor(), Some(10_080));
        assert_eq!(Resolution::OneMinute.aggregation_factor(), None);
        assert_eq!(Resolution::Event.aggregation_factor(), None);
    }

    #[test]
    fn resolution_serializes_as_code() {
        let json = serde_json::to_string(&Resolution::FourHours).unwrap();
        assert_eq!(json, "\"4h\"");
        let back: Resolution = serde_json::from_str("\"3m\"").unwrap();
        assert_eq!(back, Resolution::Other("3m".to_string()));
    }

    #[test]
    fn key_display() {
        let record = bar(1.0, 2.0, 0.5, 1.5, 3.0);
        assert_eq!(record.key().to_string(), "binance:BTCUSDT");
        assert_eq!(
            serde_json::to_string(&record.key()).unwrap(),
            "\"binance:BTCUSDT\""
        );
    }

    #[test]
    fn record_serializes_camel_case() {
        let mut record = bar(1.0, 2.0, 0.5, 1.5, 3.0);
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("aggregatedFrom").is_none());
        assert_eq!(json["resolution"], "1m");

        record.aggregated_from = Some(5);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["aggregatedFrom"], 5);
    }

    #[test]
    fn point_clamps_probability() {
        let p = CanonicalRecord::point(
            "polymarket",
            "POLY:x:1".to_string(),
            0,
            1.7,
            -3.0,
            "polymarket".to_string(),
            serde_json::Value::Null,
        );
        assert!(p.is_point());
        assert_eq!(p.open, 1.0);
        assert_eq!(p.low, 1.0);
        assert_eq!(p.volume, 0.0);
        assert!(p.is_consistent());
    }

    #[test]
    fn inconsistent_record_detected() {
        assert!(!bar(10.0, 5.0, 1.0, 4.0, 1.0).is_consistent());
        assert!(!bar(3.0, 5.0, 1.0, 4.0, -1.0).is_consistent());
        assert!(!bar(f64::NAN, 5.0, 1.0, 4.0, 1.0).is_consistent());
    }

    proptest! {
        #[test]
        fn ohlc_invariant_holds_for_valid_tuples(
            low in 0.0f64..1_000.0,
            span in 0.0f64..1_000.0,
            open_frac in 0.0f64..=1.0,
            close_frac in 0.0f64..=1.0,
            volume in 0.0f64..1e9,
        ) {
            let high = low + span;
            let open = (low + span * open_frac).clamp(low, high);
            let close = (low + span * close_frac).clamp(low, high);
            let record = bar(open, high, low, close, volume);
            prop_assert!(record.is_consistent());
        }

        #[test]
        fn ohlc_invariant_rejects_out_of_range_open(
            low in 0.0f64..1_000.0,
            span in 0.0f64..1_000.0,
            excess in 0.001f64..100.0,
        ) {
            let high = low + span;
            let record = bar(high + excess, high, low, low, 1.0);
            prop_assert!(!record.is_consistent());
        }

        #[test]
        fn negative_volume_is_inconsistent(volume in -1e9f64..-0.000_001) {
            let record = bar(1.0, 2.0, 0.5, 1.5, volume);
            prop_assert!(!record.is_consistent());
        }
    }
}
