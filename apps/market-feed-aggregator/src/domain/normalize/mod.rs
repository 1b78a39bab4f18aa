//! Normalizer
//!
//! Pure functions mapping a provider-specific raw record into one
//! [`CanonicalRecord`]. Two independent concerns:
//!
//! - `value`: OHLCV extraction, float coercion, timestamp defaults, and
//!   interval code lookup
//! - `symbol`: provider casing/separator rules, `SymbolKey` composition,
//!   and symbol validation for query paths
//!
//! Malformed optional fields never fail normalization. Only a missing or
//! non-string symbol is rejected, with [`NormalizationError`].

mod provider;
mod symbol;
mod value;

use serde_json::Value;

pub use provider::Provider;
pub use symbol::{
    SymbolValidation, is_tradable_pair, normalize_symbol, parse_key, split_base_quote, symbol_key,
    validate_symbol,
};
pub use value::{coerce_f64, coerce_timestamp, resolution_from_interval};

use crate::domain::record::CanonicalRecord;

// =============================================================================
// Raw Record
// =============================================================================

/// Provider-agnostic bag of raw fields extracted by a session's parser.
///
/// Every field is optional and untyped; the normalizer decides how to coerce.
/// For probability providers, `probability` replaces the OHLC fields.
#[derive(Debug, Clone, Default)]
pub struct RawRecord {
    /// Upstream symbol or instrument id.
    pub symbol: Option<Value>,
    /// Upstream timestamp (ms number, numeric string, or RFC 3339).
    pub timestamp: Option<Value>,
    /// Open price.
    pub open: Option<Value>,
    /// High price.
    pub high: Option<Value>,
    /// Low price.
    pub low: Option<Value>,
    /// Close price.
    pub close: Option<Value>,
    /// Volume.
    pub volume: Option<Value>,
    /// Probability for event-style sources.
    pub probability: Option<Value>,
    /// Provider interval code.
    pub interval: Option<String>,
    /// Source tag override (e.g. `alpaca_2`); defaults to the provider's.
    pub source: Option<String>,
    /// Original payload.
    pub raw: Value,
}

// =============================================================================
// Errors
// =============================================================================

/// The one unrecoverable input defect: no usable symbol.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizationError {
    /// Symbol field absent or empty.
    #[error("symbol field is missing")]
    MissingSymbol,
    /// Symbol field present but not a string.
    #[error("symbol field is not a string: {0}")]
    InvalidSymbolType(String),
}

// =============================================================================
// Normalization
// =============================================================================

/// Normalize a raw record using the current time as the receipt time.
///
/// # Errors
///
/// Returns [`NormalizationError`] when the symbol is absent or not a string.
pub fn normalize(raw: RawRecord, provider: Provider) -> Result<CanonicalRecord, NormalizationError> {
    normalize_at(raw, provider, chrono::Utc::now().timestamp_millis())
}

/// Normalize a raw record with an explicit receipt time (ms).
///
/// # Errors
///
/// Returns [`NormalizationError`] when the symbol is absent or not a string.
pub fn normalize_at(
    raw: RawRecord,
    provider: Provider,
    received_at: i64,
) -> Result<CanonicalRecord, NormalizationError> {
    let symbol = match &raw.symbol {
        Some(Value::String(s)) => normalize_symbol(s, provider),
        Some(other) => return Err(NormalizationError::InvalidSymbolType(other.to_string())),
        None => return Err(NormalizationError::MissingSymbol),
    };
    if symbol.is_empty() {
        return Err(NormalizationError::MissingSymbol);
    }

    let timestamp = coerce_timestamp(raw.timestamp.as_ref(), received_at);
    let source = raw
        .source
        .clone()
        .unwrap_or_else(|| provider.source().to_string());

    if provider.is_prediction() {
        return Ok(CanonicalRecord::point(
            provider.exchange(),
            symbol,
            timestamp,
            coerce_f64(raw.probability.as_ref()),
            coerce_f64(raw.volume.as_ref()),
            source,
            raw.raw,
        ));
    }

    let resolution = raw
        .interval
        .as_deref()
        .map_or_else(|| provider.default_resolution(), resolution_from_interval);

    Ok(CanonicalRecord {
        symbol,
        exchange: provider.exchange().to_string(),
        timestamp,
        open: coerce_f64(raw.open.as_ref()),
        high: coerce_f64(raw.high.as_ref()),
        low: coerce_f64(raw.low.as_ref()),
        close: coerce_f64(raw.close.as_ref()),
        volume: coerce_f64(raw.volume.as_ref()),
        resolution,
        source,
        aggregated_from: None,
        raw: raw.raw,
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::record::Resolution;
    use serde_json::json;

    fn kline(symbol: Value) -> RawRecord {
        RawRecord {
            symbol: Some(symbol),
            timestamp: Some(json!(1_700_000_000_000_i64)),
            open: Some(json!("100.5")),
            high: Some(json!("101")),
            low: Some(json!(99.5)),
            close: Some(json!("100.75")),
            volume: Some(json!("12.5")),
            interval: Some("1m".to_string()),
            ..RawRecord::default()
        }
    }

    #[test]
    fn normalizes_binance_kline() {
        let record = normalize_at(kline(json!("btcusdt")), Provider::Binance, 0).unwrap();

        assert_eq!(record.symbol, "BTCUSDT");
        assert_eq!(record.exchange, "binance");
        assert_eq!(record.source, "binance_futures");
        assert_eq!(record.timestamp, 1_700_000_000_000);
        assert_eq!(record.open, 100.5);
        assert_eq!(record.high, 101.0);
        assert_eq!(record.low, 99.5);
        assert_eq!(record.close, 100.75);
        assert_eq!(record.volume, 12.5);
        assert_eq!(record.resolution, Resolution::OneMinute);
        assert_eq!(record.key().to_string(), "binance:BTCUSDT");
    }

    #[test]
    fn missing_symbol_is_rejected() {
        let mut raw = kline(json!("x"));
        raw.symbol = None;
        assert_eq!(
            normalize_at(raw, Provider::Bybit, 0),
            Err(NormalizationError::MissingSymbol)
        );
    }

    #[test]
    fn non_string_symbol_is_rejected() {
        let result = normalize_at(kline(json!(42)), Provider::Bybit, 0);
        assert!(matches!(
            result,
            Err(NormalizationError::InvalidSymbolType(_))
        ));
    }

    #[test]
    fn blank_symbol_is_missing() {
        let result = normalize_at(kline(json!("   ")), Provider::Alpaca, 0);
        assert_eq!(result, Err(NormalizationError::MissingSymbol));
    }

    #[test]
    fn malformed_optional_fields_default() {
        let raw = RawRecord {
            symbol: Some(json!("ETH-USDT")),
            open: Some(json!("not a number")),
            high: Some(json!(null)),
            low: None,
            close: Some(json!({"nested": true})),
            ..RawRecord::default()
        };

        let record = normalize_at(raw, Provider::Blofin, 1234).unwrap();

        assert_eq!(record.symbol, "ETHUSDT");
        assert_eq!(record.timestamp, 1234);
        assert_eq!(record.open, 0.0);
        assert_eq!(record.high, 0.0);
        assert_eq!(record.low, 0.0);
        assert_eq!(record.close, 0.0);
        assert_eq!(record.volume, 0.0);
        assert_eq!(record.resolution, Resolution::OneMinute);
    }

    #[test]
    fn unknown_interval_passes_through() {
        let mut raw = kline(json!("BTCUSDT"));
        raw.interval = Some("3d".to_string());
        let record = normalize_at(raw, Provider::Binance, 0).unwrap();
        assert_eq!(record.resolution, Resolution::Other("3d".to_string()));
    }

    #[test]
    fn probability_provider_builds_point() {
        let raw = RawRecord {
            symbol: Some(json!("POLY:election:123")),
            probability: Some(json!("0.62")),
            volume: Some(json!(5000)),
            ..RawRecord::default()
        };

        let record = normalize_at(raw, Provider::Polymarket, 99).unwrap();

        assert_eq!(record.resolution, Resolution::Event);
        assert_eq!(record.open, 0.62);
        assert_eq!(record.close, 0.62);
        assert_eq!(record.high, 0.62);
        assert_eq!(record.low, 0.62);
        assert_eq!(record.volume, 5000.0);
        assert_eq!(record.timestamp, 99);
        assert_eq!(record.key().to_string(), "polymarket:POLY:election:123");
    }

    #[test]
    fn source_override_is_kept() {
        let mut raw = kline(json!("AAPL"));
        raw.source = Some("alpaca_2".to_string());
        let record = normalize_at(raw, Provider::Alpaca, 0).unwrap();
        assert_eq!(record.source, "alpaca_2");
        assert_eq!(record.exchange, "alpaca");
    }
}
