//! Provider Implementations
//!
//! Data-driven hooks plugged into the generic session engines. Stream
//! providers implement [`StreamProvider`](super::session::StreamProvider),
//! poll providers implement [`PollProvider`](super::session::PollProvider).
//! [`build_sessions`] turns configuration into the session set the
//! orchestrator runs, splitting symbol lists to respect per-connection caps.

pub mod alpaca;
pub mod binance;
pub mod blofin;
pub mod bybit;
pub mod discovery;
pub mod gecko;
pub mod odds;
pub mod polymarket;

use std::sync::Arc;

use crate::domain::normalize::Provider;
use crate::infrastructure::config::AggregatorConfig;
use crate::infrastructure::session::{PollSession, ReconnectConfig, Session, StreamProvider, StreamSession};

pub use alpaca::AlpacaStream;
pub use binance::BinanceStream;
pub use blofin::BlofinStream;
pub use bybit::BybitStream;
pub use discovery::SymbolDiscovery;
pub use gecko::GeckoTerminalPoll;
pub use odds::OddsApiPoll;
pub use polymarket::PolymarketPoll;

/// Sessions built from configuration, split by transport.
#[derive(Default)]
pub struct SessionSet {
    /// WebSocket sessions, started first.
    pub streams: Vec<Arc<dyn Session>>,
    /// HTTP poll sessions, started after the streams.
    pub polls: Vec<Arc<dyn Session>>,
}

impl SessionSet {
    /// Total session count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.streams.len() + self.polls.len()
    }

    /// Whether no session was built.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty() && self.polls.is_empty()
    }
}

/// Split `symbols` into chunks of at most `max` (at least one per chunk).
#[must_use]
pub fn chunk_symbols(symbols: &[String], max: usize) -> Vec<Vec<String>> {
    symbols.chunks(max.max(1)).map(<[String]>::to_vec).collect()
}

/// One session per chunk of `symbols`. A single chunk keeps `name`; several
/// get an index suffix.
fn stream_sessions<P>(
    name: &str,
    provider: &P,
    symbols: &[String],
    reconnect: &ReconnectConfig,
    config: &AggregatorConfig,
) -> Vec<Arc<dyn Session>>
where
    P: StreamProvider + Clone,
{
    let chunks = chunk_symbols(symbols, provider.max_streams());
    let many = chunks.len() > 1;

    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let session_name = if many { format!("{name}_{i}") } else { name.to_string() };
            let session = StreamSession::new(session_name, provider.clone(), chunk, reconnect.clone())
                .with_heartbeat(config.streams.heartbeat.clone())
                .with_connect_timeout(config.streams.connect_timeout);
            Arc::new(session) as Arc<dyn Session>
        })
        .collect()
}

fn owned(symbols: &[&str]) -> Vec<String> {
    symbols.iter().map(|s| (*s).to_string()).collect()
}

/// Build every configured session. Crypto symbols are discovered over REST
/// when enabled.
pub async fn build_sessions(config: &AggregatorConfig, client: reqwest::Client) -> SessionSet {
    let streams_config = &config.streams;
    let reconnect = &config.reconnect;

    let (binance_symbols, bybit_symbols) = if streams_config.discovery_enabled {
        let discovery = SymbolDiscovery::new(
            client,
            streams_config.binance_rest_url.clone(),
            streams_config.bybit_rest_url.clone(),
            streams_config.max_symbols_per_source,
        );
        tokio::join!(discovery.binance(), discovery.bybit())
    } else {
        (owned(&discovery::BINANCE_FALLBACK), owned(&discovery::BYBIT_FALLBACK))
    };

    let mut set = SessionSet::default();

    set.streams.extend(stream_sessions(
        Provider::Binance.source(),
        &BinanceStream::new(streams_config.binance_url.clone()),
        &binance_symbols,
        &reconnect.binance,
        config,
    ));
    set.streams.extend(stream_sessions(
        Provider::Bybit.source(),
        &BybitStream::new(streams_config.bybit_url.clone()),
        &bybit_symbols,
        &reconnect.bybit,
        config,
    ));
    set.streams.extend(stream_sessions(
        Provider::Blofin.source(),
        &BlofinStream::new(streams_config.blofin_url.clone()),
        &owned(&blofin::DEFAULT_INSTRUMENTS),
        &reconnect.blofin,
        config,
    ));

    let alpaca_sets = [&alpaca::SYMBOL_SET_1[..], &alpaca::SYMBOL_SET_2[..]];
    for (i, (credentials, symbols)) in streams_config
        .alpaca_credentials
        .iter()
        .zip(alpaca_sets)
        .enumerate()
    {
        let index = i + 1;
        let Some(credentials) = credentials else {
            tracing::info!(index, "Alpaca credential set not configured, skipping");
            continue;
        };
        let stream = AlpacaStream::new(streams_config.alpaca_url.clone(), credentials.clone(), index);
        let name = stream.source().to_string();
        set.streams.extend(stream_sessions(
            &name,
            &stream,
            &owned(symbols),
            &reconnect.alpaca,
            config,
        ));
    }

    let polls = &config.polls;
    set.polls.push(Arc::new(PollSession::new(
        Provider::GeckoTerminal.source(),
        GeckoTerminalPoll::new(polls.gecko_url.clone(), polls.gecko_networks.clone(), polls.gecko_interval),
        reconnect.poll.clone(),
    )));

    match &polls.odds_api_key {
        Some(key) => set.polls.push(Arc::new(PollSession::new(
            Provider::OddsApi.source(),
            OddsApiPoll::new(polls.odds_url.clone(), key.clone(), polls.odds_interval)
                .with_format(polls.odds_format),
            reconnect.poll.clone(),
        ))),
        None => tracing::info!("ODDS_API_KEY not set, skipping OddsAPI"),
    }

    set.polls.push(Arc::new(PollSession::new(
        Provider::Polymarket.source(),
        PolymarketPoll::new(polls.polymarket_url.clone(), polls.polymarket_interval),
        reconnect.poll.clone(),
    )));

    tracing::info!(
        streams = set.streams.len(),
        polls = set.polls.len(),
        "Sessions built"
    );
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::Credentials;

    fn symbols(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("S{i}USDT")).collect()
    }

    #[test]
    fn chunking_respects_cap() {
        let chunks = chunk_symbols(&symbols(450), 200);
        let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![200, 200, 50]);
    }

    #[test]
    fn empty_list_has_no_chunks() {
        assert!(chunk_symbols(&[], 10).is_empty());
    }

    #[test]
    fn oversized_list_gets_indexed_names() {
        let config = AggregatorConfig::default();
        let sessions = stream_sessions(
            "binance_futures",
            &BinanceStream::default(),
            &symbols(201),
            &config.reconnect.binance,
            &config,
        );
        let names: Vec<&str> = sessions.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["binance_futures_0", "binance_futures_1"]);
    }

    #[tokio::test]
    async fn build_without_discovery_or_keys() {
        let mut config = AggregatorConfig::default();
        config.streams.discovery_enabled = false;

        let set = build_sessions(&config, reqwest::Client::new()).await;
        let names: Vec<&str> = set.streams.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["binance_futures", "bybit_linear", "blofin"]);

        let polls: Vec<&str> = set.polls.iter().map(|s| s.name()).collect();
        assert_eq!(polls, vec!["geckoterminal", "polymarket"]);
        assert_eq!(set.len(), 5);
    }

    #[tokio::test]
    async fn configured_credentials_and_key_add_sessions() {
        let mut config = AggregatorConfig::default();
        config.streams.discovery_enabled = false;
        config.streams.alpaca_credentials[1] =
            Some(Credentials::new("k".to_string(), "s".to_string()));
        config.polls.odds_api_key = Some("key".to_string());

        let set = build_sessions(&config, reqwest::Client::new()).await;
        assert!(set.streams.iter().any(|s| s.name() == "alpaca_2"));
        assert!(!set.streams.iter().any(|s| s.name() == "alpaca_1"));
        assert!(set.polls.iter().any(|s| s.name() == "oddsapi"));
    }
}
