//! Charting-protocol (UDF) queries.
//!
//! Converts stored records into the parallel-array history format charting
//! clients expect, with an explicit `no_data` sentinel for empty ranges.

use serde::Serialize;

use crate::domain::normalize::Provider;
use crate::domain::record::{CanonicalRecord, Resolution, SymbolKey};

/// UDF resolution codes this server answers, in display order.
pub const SUPPORTED_RESOLUTIONS: [&str; 8] = ["1", "5", "15", "30", "60", "240", "D", "W"];

/// Map a UDF resolution code to a canonical resolution.
#[must_use]
pub fn resolution_from_udf(code: &str) -> Option<Resolution> {
    match code.trim() {
        "1" => Some(Resolution::OneMinute),
        "5" => Some(Resolution::FiveMinutes),
        "15" => Some(Resolution::FifteenMinutes),
        "30" => Some(Resolution::ThirtyMinutes),
        "60" => Some(Resolution::OneHour),
        "240" => Some(Resolution::FourHours),
        "D" | "1D" => Some(Resolution::OneDay),
        "W" | "1W" => Some(Resolution::OneWeek),
        _ => None,
    }
}

/// Map a canonical resolution back to its UDF code.
#[must_use]
pub const fn udf_code(resolution: &Resolution) -> Option<&'static str> {
    match resolution {
        Resolution::OneMinute => Some("1"),
        Resolution::FiveMinutes => Some("5"),
        Resolution::FifteenMinutes => Some("15"),
        Resolution::ThirtyMinutes => Some("30"),
        Resolution::OneHour => Some("60"),
        Resolution::FourHours => Some("240"),
        Resolution::OneDay => Some("D"),
        Resolution::OneWeek => Some("W"),
        Resolution::Event | Resolution::Other(_) => None,
    }
}

// =============================================================================
// History
// =============================================================================

/// Range filter for a history request. Bounds are inclusive, in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryRange {
    /// Earliest bar time.
    pub from: Option<i64>,
    /// Latest bar time.
    pub to: Option<i64>,
    /// Keep only the last `countback` bars.
    pub countback: Option<usize>,
}

/// UDF history response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "s", rename_all = "snake_case")]
pub enum HistoryResponse {
    /// Parallel arrays, oldest first.
    Ok {
        /// Bar times in seconds.
        t: Vec<i64>,
        /// Opens.
        o: Vec<f64>,
        /// Highs.
        h: Vec<f64>,
        /// Lows.
        l: Vec<f64>,
        /// Closes.
        c: Vec<f64>,
        /// Volumes.
        v: Vec<f64>,
    },
    /// The range holds no bars.
    NoData,
    /// The request could not be answered.
    Error {
        /// Human-readable reason.
        errmsg: String,
    },
}

impl HistoryResponse {
    /// Build a response from records ordered oldest first.
    #[must_use]
    pub fn from_records(records: &[CanonicalRecord], range: HistoryRange) -> Self {
        let in_range: Vec<&CanonicalRecord> = records
            .iter()
            .filter(|r| {
                let secs = r.timestamp.div_euclid(1000);
                range.from.is_none_or(|from| secs >= from) && range.to.is_none_or(|to| secs <= to)
            })
            .collect();

        let skip = range
            .countback
            .map_or(0, |n| in_range.len().saturating_sub(n));
        let bars = &in_range[skip..];

        if bars.is_empty() {
            return Self::NoData;
        }

        Self::Ok {
            t: bars.iter().map(|r| r.timestamp.div_euclid(1000)).collect(),
            o: bars.iter().map(|r| r.open).collect(),
            h: bars.iter().map(|r| r.high).collect(),
            l: bars.iter().map(|r| r.low).collect(),
            c: bars.iter().map(|r| r.close).collect(),
            v: bars.iter().map(|r| r.volume).collect(),
        }
    }

    /// Error response.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            errmsg: message.into(),
        }
    }
}

// =============================================================================
// Metadata
// =============================================================================

/// Datafeed configuration advertised at `/udf/config`.
#[derive(Debug, Clone, Serialize)]
pub struct UdfConfig {
    /// Supported UDF resolution codes.
    pub supported_resolutions: Vec<&'static str>,
    /// Whether `/udf/search` is available.
    pub supports_search: bool,
    /// Whether grouped symbol requests are available.
    pub supports_group_request: bool,
    /// Whether marks are available.
    pub supports_marks: bool,
    /// Whether `/udf/time` is available.
    pub supports_time: bool,
}

impl Default for UdfConfig {
    fn default() -> Self {
        Self {
            supported_resolutions: SUPPORTED_RESOLUTIONS.to_vec(),
            supports_search: false,
            supports_group_request: false,
            supports_marks: false,
            supports_time: true,
        }
    }
}

/// Symbol description at `/udf/symbols`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SymbolInfo {
    /// `exchange:symbol`.
    pub name: String,
    /// Same as `name`; charting clients key on it.
    pub ticker: String,
    /// Human-readable description.
    pub description: String,
    /// Exchange component.
    pub exchange: String,
    /// `crypto`, `stock` or `prediction`.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Trading session.
    pub session: &'static str,
    /// IANA timezone.
    pub timezone: &'static str,
    /// Supported UDF resolution codes.
    pub supported_resolutions: Vec<&'static str>,
    /// Whether intraday bars exist.
    pub has_intraday: bool,
}

impl SymbolInfo {
    /// Describe a symbol.
    #[must_use]
    pub fn for_key(key: &SymbolKey) -> Self {
        let kind = match Provider::from_exchange(key.exchange()) {
            Some(Provider::Alpaca) => "stock",
            Some(p) if p.is_prediction() => "prediction",
            _ => "crypto",
        };
        Self {
            name: key.to_string(),
            ticker: key.to_string(),
            description: format!("{} on {}", key.symbol(), key.exchange()),
            exchange: key.exchange().to_string(),
            kind,
            session: "24x7",
            timezone: "Etc/UTC",
            supported_resolutions: SUPPORTED_RESOLUTIONS.to_vec(),
            has_intraday: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    fn bar(ts_secs: i64, close: f64) -> CanonicalRecord {
        CanonicalRecord {
            symbol: "BTCUSDT".to_string(),
            exchange: "binance".to_string(),
            timestamp: ts_secs * 1000,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 3.0,
            resolution: Resolution::OneMinute,
            source: "binance_futures".to_string(),
            aggregated_from: None,
            raw: serde_json::Value::Null,
        }
    }

    #[test_case("1", Some(Resolution::OneMinute) ; "minute")]
    #[test_case("60", Some(Resolution::OneHour) ; "hour")]
    #[test_case("1D", Some(Resolution::OneDay) ; "day alias")]
    #[test_case("W", Some(Resolution::OneWeek) ; "week")]
    #[test_case("3", None ; "unsupported")]
    fn udf_codes(code: &str, expected: Option<Resolution>) {
        assert_eq!(resolution_from_udf(code), expected);
    }

    #[test]
    fn codes_round_trip() {
        for code in SUPPORTED_RESOLUTIONS {
            let res = resolution_from_udf(code).unwrap();
            assert_eq!(udf_code(&res), Some(code));
        }
    }

    #[test]
    fn empty_history_is_no_data() {
        let response = HistoryResponse::from_records(&[], HistoryRange::default());
        assert_eq!(response, HistoryResponse::NoData);
        assert_eq!(serde_json::to_value(&response).unwrap(), json!({"s": "no_data"}));
    }

    #[test]
    fn range_outside_data_is_no_data() {
        let records = [bar(100, 1.0), bar(160, 2.0)];
        let range = HistoryRange {
            from: Some(1_000),
            to: Some(2_000),
            countback: None,
        };
        assert_eq!(HistoryResponse::from_records(&records, range), HistoryResponse::NoData);
    }

    #[test]
    fn parallel_arrays_in_seconds() {
        let records = [bar(60, 1.0), bar(120, 2.0), bar(180, 3.0)];
        let range = HistoryRange {
            from: Some(100),
            to: None,
            countback: None,
        };

        let json = serde_json::to_value(HistoryResponse::from_records(&records, range)).unwrap();

        assert_eq!(json["s"], "ok");
        assert_eq!(json["t"], json!([120, 180]));
        assert_eq!(json["c"], json!([2.0, 3.0]));
        assert_eq!(json["h"], json!([3.0, 4.0]));
        assert_eq!(json["v"], json!([3.0, 3.0]));
    }

    #[test]
    fn countback_keeps_latest() {
        let records = [bar(60, 1.0), bar(120, 2.0), bar(180, 3.0)];
        let range = HistoryRange {
            countback: Some(1),
            ..HistoryRange::default()
        };
        let HistoryResponse::Ok { t, .. } = HistoryResponse::from_records(&records, range) else {
            panic!("expected bars");
        };
        assert_eq!(t, vec![180]);
    }

    #[test]
    fn error_shape() {
        let json = serde_json::to_value(HistoryResponse::error("bad resolution")).unwrap();
        assert_eq!(json, json!({"s": "error", "errmsg": "bad resolution"}));
    }

    #[test]
    fn symbol_kinds() {
        let stock = SymbolKey::new("alpaca", "AAPL");
        let odds = SymbolKey::new("oddsapi", "ODDS:nba:1:A");
        let crypto = SymbolKey::new("EXA", "BTCUSDT");

        assert_eq!(SymbolInfo::for_key(&stock).kind, "stock");
        assert_eq!(SymbolInfo::for_key(&odds).kind, "prediction");
        let info = SymbolInfo::for_key(&crypto);
        assert_eq!(info.kind, "crypto");
        assert_eq!(serde_json::to_value(&info).unwrap()["type"], "crypto");
    }
}
