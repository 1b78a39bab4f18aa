//! Provider tags.

use crate::domain::record::Resolution;

/// Upstream provider, the tag that selects normalization rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    /// Binance USDT-margined futures klines.
    Binance,
    /// Bybit linear perpetual klines.
    Bybit,
    /// Blofin candlesticks.
    Blofin,
    /// Alpaca stock bars.
    Alpaca,
    /// GeckoTerminal DEX pool snapshots.
    GeckoTerminal,
    /// The Odds API sports markets.
    OddsApi,
    /// Polymarket prediction markets.
    Polymarket,
}

impl Provider {
    /// Every provider.
    pub const ALL: [Self; 7] = [
        Self::Binance,
        Self::Bybit,
        Self::Blofin,
        Self::Alpaca,
        Self::GeckoTerminal,
        Self::OddsApi,
        Self::Polymarket,
    ];

    /// Exchange component used in `SymbolKey`s.
    #[must_use]
    pub const fn exchange(self) -> &'static str {
        match self {
            Self::Binance => "binance",
            Self::Bybit => "bybit",
            Self::Blofin => "blofin",
            Self::Alpaca => "alpaca",
            Self::GeckoTerminal => "gecko",
            Self::OddsApi => "oddsapi",
            Self::Polymarket => "polymarket",
        }
    }

    /// Default source tag stamped on records.
    #[must_use]
    pub const fn source(self) -> &'static str {
        match self {
            Self::Binance => "binance_futures",
            Self::Bybit => "bybit_linear",
            Self::Blofin => "blofin",
            Self::Alpaca => "alpaca",
            Self::GeckoTerminal => "geckoterminal",
            Self::OddsApi => "oddsapi",
            Self::Polymarket => "polymarket",
        }
    }

    /// Map an upstream source name to its provider.
    #[must_use]
    pub fn from_source(source: &str) -> Option<Self> {
        match source.trim().to_ascii_lowercase().as_str() {
            "binance" | "binance_futures" => Some(Self::Binance),
            "bybit" | "bybit_linear" => Some(Self::Bybit),
            "blofin" => Some(Self::Blofin),
            "alpaca" | "alpaca_1" | "alpaca_2" => Some(Self::Alpaca),
            "gecko" | "geckoterminal" => Some(Self::GeckoTerminal),
            "oddsapi" => Some(Self::OddsApi),
            "polymarket" => Some(Self::Polymarket),
            _ => None,
        }
    }

    /// Map a `SymbolKey` exchange component to its provider.
    #[must_use]
    pub fn from_exchange(exchange: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.exchange().eq_ignore_ascii_case(exchange.trim()))
    }

    /// Whether this provider publishes probabilities rather than prices.
    #[must_use]
    pub const fn is_prediction(self) -> bool {
        matches!(self, Self::OddsApi | Self::Polymarket)
    }

    /// Resolution assumed when a record carries no interval code.
    #[must_use]
    pub fn default_resolution(self) -> Resolution {
        match self {
            Self::Binance | Self::Bybit | Self::Blofin | Self::Alpaca => Resolution::OneMinute,
            Self::GeckoTerminal => Resolution::Other("24h".to_string()),
            Self::OddsApi | Self::Polymarket => Resolution::Event,
        }
    }
}
