//! Value normalization: numeric coercion, timestamps, interval codes.

use chrono::DateTime;
use serde_json::Value;

use crate::domain::record::Resolution;

/// Coerce a JSON value to `f64`.
///
/// Numbers pass through, numeric strings are parsed, everything else
/// (including non-finite results) becomes `0.0`.
#[must_use]
pub fn coerce_f64(value: Option<&Value>) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite()).unwrap_or(0.0)
}

/// Coerce a JSON value to a millisecond timestamp.
///
/// Accepts integer or float milliseconds, numeric strings, and RFC 3339
/// strings. Anything else falls back to `received_at`.
#[must_use]
pub fn coerce_timestamp(value: Option<&Value>, received_at: i64) -> i64 {
    match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(truncate_millis))
            .unwrap_or(received_at),
        Some(Value::String(s)) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.timestamp_millis()))
                .unwrap_or(received_at)
        }
        _ => received_at,
    }
}

#[allow(clippy::cast_possible_truncation)]
fn truncate_millis(value: f64) -> i64 {
    value as i64
}

/// Map a provider interval code to a resolution.
///
/// Covers both minute-count codes (`"1"`, `"60"`, `"D"`) and suffixed codes
/// (`"1m"`, `"4h"`). Unknown codes pass through unchanged.
#[must_use]
pub fn resolution_from_interval(code: &str) -> Resolution {
    let canonical = match code.trim() {
        "1" | "1m" => "1m",
        "3" | "3m" => "3m",
        "5" | "5m" => "5m",
        "15" | "15m" => "15m",
        "30" | "30m" => "30m",
        "60" | "1h" => "1h",
        "120" | "2h" => "2h",
        "240" | "4h" => "4h",
        "360" | "6h" => "6h",
        "480" | "8h" => "8h",
        "720" | "12h" => "12h",
        "D" | "1D" | "1d" => "1d",
        "3D" | "3d" => "3d",
        "W" | "1W" | "1w" => "1w",
        "M" | "1M" => "1M",
        other => other,
    };
    Resolution::from_code(canonical)
}
