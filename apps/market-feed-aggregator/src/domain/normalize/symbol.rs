//! Symbol normalization, `SymbolKey` composition, and validation.

use std::sync::LazyLock;

use regex::Regex;

use super::Provider;
use crate::domain::record::SymbolKey;

/// Exchange assumed for keys that carry no `exchange:` prefix.
const DEFAULT_EXCHANGE: &str = "binance";

/// Symbol prefixes that identify a prediction provider on their own.
const PREDICTION_PREFIXES: [(&str, Provider); 2] =
    [("ODDS:", Provider::OddsApi), ("POLY:", Provider::Polymarket)];

/// Longest symbol accepted by [`validate_symbol`] for price providers.
const MAX_SYMBOL_LEN: usize = 20;

/// Quote currencies recognized by [`split_base_quote`], longest first.
const KNOWN_QUOTES: [&str; 5] = ["USDT", "USD", "BTC", "ETH", "EUR"];

#[allow(clippy::expect_used)]
static CRYPTO_PAIR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Z0-9]{2,15}(USDT|USD|BTC|ETH)$").expect("static crypto pair pattern is valid")
});

#[allow(clippy::expect_used)]
static STOCK_TICKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{1,5}$").expect("static ticker pattern is valid"));

/// Apply a provider's casing and separator rules.
///
/// - Binance: uppercase, force a single `USDT` suffix
/// - Bybit: uppercase, append `USDT` when missing
/// - Blofin: uppercase, drop `-` separators (`BTC-USDT` -> `BTCUSDT`)
/// - Alpaca: uppercase
/// - GeckoTerminal: uppercase, unify separators to `_`
/// - Prediction providers: trimmed only, their ids are case sensitive
#[must_use]
pub fn normalize_symbol(symbol: &str, provider: Provider) -> String {
    let trimmed = symbol.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if provider.is_prediction() {
        return trimmed.to_string();
    }

    let upper = trimmed.to_uppercase();
    match provider {
        Provider::Binance => {
            let base = upper.strip_suffix("USDT").unwrap_or(&upper);
            format!("{base}USDT")
        }
        Provider::Bybit => {
            if upper.ends_with("USDT") {
                upper
            } else {
                format!("{upper}USDT")
            }
        }
        Provider::Blofin => upper.replace('-', ""),
        Provider::GeckoTerminal => upper.replace(['/', '-', ' '], "_"),
        Provider::Alpaca | Provider::OddsApi | Provider::Polymarket => upper,
    }
}

/// Fallback rule for exchanges without a provider: uppercase, keep
/// `[A-Z0-9_]`.
fn normalize_generic(symbol: &str) -> String {
    symbol
        .trim()
        .to_uppercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

/// Build the key for a provider symbol.
#[must_use]
pub fn symbol_key(provider: Provider, symbol: &str) -> SymbolKey {
    SymbolKey::new(provider.exchange(), normalize_symbol(symbol, provider))
}

/// Parse `exchange:symbol`, splitting on the first `:`.
///
/// A bare symbol is assigned the default exchange, except `ODDS:`/`POLY:`
/// ids which belong to their prediction provider whole. Known exchanges get
/// their provider's symbol rules; unknown exchanges keep their spelling and
/// get the generic symbol rule. Returns `None` for empty components.
#[must_use]
pub fn parse_key(key: &str) -> Option<SymbolKey> {
    let key = key.trim();
    if let Some((prefix, provider)) = PREDICTION_PREFIXES
        .iter()
        .find(|(prefix, _)| key.starts_with(prefix))
    {
        return (key.len() > prefix.len()).then(|| symbol_key(*provider, key));
    }
    let (exchange, symbol) = key.split_once(':').unwrap_or((DEFAULT_EXCHANGE, key));
    let exchange = exchange.trim();
    if exchange.is_empty() || symbol.trim().is_empty() {
        return None;
    }

    let key = Provider::from_exchange(exchange).map_or_else(
        || SymbolKey::new(exchange, normalize_generic(symbol)),
        |provider| symbol_key(provider, symbol),
    );
    (!key.symbol().is_empty()).then_some(key)
}

/// Outcome of [`validate_symbol`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolValidation {
    /// Whether the symbol is usable.
    pub valid: bool,
    /// Why it is not.
    pub reason: Option<String>,
    /// Normalized key when valid.
    pub key: Option<SymbolKey>,
}

impl SymbolValidation {
    fn invalid(reason: &str) -> Self {
        Self {
            valid: false,
            reason: Some(reason.to_string()),
            key: None,
        }
    }
}

/// Validate a user- or upstream-supplied symbol for a provider.
///
/// Invalid symbols are reported with a reason, never coerced.
#[must_use]
pub fn validate_symbol(symbol: &str, provider: Provider) -> SymbolValidation {
    let trimmed = symbol.trim();

    if provider.is_prediction() {
        if trimmed.is_empty() {
            return SymbolValidation::invalid("Invalid symbol length or type");
        }
    } else {
        if trimmed.is_empty() || trimmed.len() > MAX_SYMBOL_LEN {
            return SymbolValidation::invalid("Invalid symbol length or type");
        }
        let bad_char = trimmed
            .to_uppercase()
            .chars()
            .any(|c| !(c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-' || c == '_'));
        if bad_char {
            return SymbolValidation::invalid("Invalid characters in symbol");
        }
    }

    let normalized = normalize_symbol(trimmed, provider);
    if !is_tradable_pair(&normalized, provider) {
        return SymbolValidation::invalid("Symbol does not appear to be a tradable pair");
    }

    SymbolValidation {
        valid: true,
        reason: None,
        key: Some(SymbolKey::new(provider.exchange(), normalized)),
    }
}

/// Whether a normalized symbol has the provider's expected shape.
#[must_use]
pub fn is_tradable_pair(symbol: &str, provider: Provider) -> bool {
    match provider {
        Provider::Binance | Provider::Bybit | Provider::Blofin => CRYPTO_PAIR.is_match(symbol),
        Provider::Alpaca => STOCK_TICKER.is_match(symbol),
        Provider::GeckoTerminal => symbol.contains('_') || symbol.ends_with("USDT"),
        Provider::OddsApi => symbol.starts_with("ODDS:"),
        Provider::Polymarket => symbol.starts_with("POLY:"),
    }
}

/// Split a pair into base and quote.
///
/// Explicit `_`/`-` separators win; otherwise a known quote suffix is used.
#[must_use]
pub fn split_base_quote(symbol: &str) -> Option<(String, String)> {
    let upper = symbol.trim().to_uppercase();

    if let Some((base, quote)) = upper.split_once(['_', '-'])
        && !base.is_empty()
        && !quote.is_empty()
    {
        return Some((base.to_string(), quote.to_string()));
    }

    KNOWN_QUOTES.iter().find_map(|quote| {
        upper
            .strip_suffix(quote)
            .filter(|base| !base.is_empty())
            .map(|base| (base.to_string(), (*quote).to_string()))
    })
}
