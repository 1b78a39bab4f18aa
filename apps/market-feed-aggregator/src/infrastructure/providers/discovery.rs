//! REST symbol discovery for the crypto stream providers.
//!
//! Discovery never fails: any transport or shape problem falls back to a
//! fixed list, so sessions always start with something to subscribe to.

use serde_json::Value;

use crate::domain::normalize::{Provider, validate_symbol};
use crate::infrastructure::session::poll::get_json;
use crate::infrastructure::session::SessionError;

/// Binance futures REST root.
pub const BINANCE_REST_URL: &str = "https://fapi.binance.com";

/// Bybit REST root.
pub const BYBIT_REST_URL: &str = "https://api.bybit.com";

/// Binance symbols used when discovery fails.
pub const BINANCE_FALLBACK: [&str; 4] = ["BTCUSDT", "ETHUSDT", "BNBUSDT", "SOLUSDT"];

/// Bybit symbols used when discovery fails.
pub const BYBIT_FALLBACK: [&str; 3] = ["BTCUSDT", "ETHUSDT", "SOLUSDT"];

/// Discovers tradable USDT perpetuals.
#[derive(Debug, Clone)]
pub struct SymbolDiscovery {
    client: reqwest::Client,
    binance_url: String,
    bybit_url: String,
    max_symbols: usize,
}

impl SymbolDiscovery {
    /// Discovery against the given REST roots, capped at `max_symbols` per
    /// provider.
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        binance_url: impl Into<String>,
        bybit_url: impl Into<String>,
        max_symbols: usize,
    ) -> Self {
        Self {
            client,
            binance_url: binance_url.into(),
            bybit_url: bybit_url.into(),
            max_symbols,
        }
    }

    /// Binance symbols with `status == TRADING` and `quoteAsset == USDT`.
    pub async fn binance(&self) -> Vec<String> {
        let url = format!("{}/fapi/v1/exchangeInfo", self.binance_url);
        let result = get_json(&self.client, &url, &[]).await.map(|body| {
            filter_symbols(
                body.get("symbols"),
                ("status", "TRADING"),
                ("quoteAsset", "USDT"),
            )
        });
        self.finish(Provider::Binance, result, &BINANCE_FALLBACK)
    }

    /// Bybit linear symbols with `status == Trading` and `quoteCoin == USDT`.
    pub async fn bybit(&self) -> Vec<String> {
        let url = format!("{}/v5/market/instruments-info", self.bybit_url);
        let result = get_json(&self.client, &url, &[("category", "linear")])
            .await
            .map(|body| {
                filter_symbols(
                    body.get("result").and_then(|r| r.get("list")),
                    ("status", "Trading"),
                    ("quoteCoin", "USDT"),
                )
            });
        self.finish(Provider::Bybit, result, &BYBIT_FALLBACK)
    }

    fn finish(
        &self,
        provider: Provider,
        result: Result<Vec<String>, SessionError>,
        fallback: &[&str],
    ) -> Vec<String> {
        let discovered = match result {
            Ok(symbols) if !symbols.is_empty() => symbols,
            Ok(_) => {
                tracing::warn!(provider = provider.source(), "Discovery returned no symbols, using fallback");
                return fallback.iter().map(|s| (*s).to_string()).collect();
            }
            Err(e) => {
                tracing::warn!(provider = provider.source(), error = %e, "Discovery failed, using fallback");
                return fallback.iter().map(|s| (*s).to_string()).collect();
            }
        };

        let symbols = cap_valid(discovered, provider, self.max_symbols);
        tracing::info!(provider = provider.source(), count = symbols.len(), "Discovered symbols");
        symbols
    }
}

/// Symbols from `list` whose two fields match the expected values.
fn filter_symbols(list: Option<&Value>, status: (&str, &str), quote: (&str, &str)) -> Vec<String> {
    let matches = |item: &Value, (field, expected): (&str, &str)| {
        item.get(field).and_then(Value::as_str) == Some(expected)
    };
    list.and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|item| matches(item, status) && matches(item, quote))
                .filter_map(|item| item.get("symbol").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Drop symbols that fail validation, then cap.
fn cap_valid(symbols: Vec<String>, provider: Provider, max: usize) -> Vec<String> {
    symbols
        .into_iter()
        .filter(|s| {
            let validation = validate_symbol(s, provider);
            if !validation.valid {
                tracing::debug!(symbol = %s, reason = ?validation.reason, "Skipping discovered symbol");
            }
            validation.valid
        })
        .take(max)
        .collect()
}
