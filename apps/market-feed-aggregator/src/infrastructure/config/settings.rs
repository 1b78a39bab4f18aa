//! Aggregator Configuration Settings
//!
//! Configuration types for the aggregator, loaded from environment variables.
//! Every setting has a typed default; malformed values fall back to it.

use std::time::Duration;

use crate::infrastructure::providers::{alpaca, binance, blofin, bybit, discovery, gecko, odds, polymarket};
use crate::infrastructure::session::ReconnectConfig;
use crate::infrastructure::session::heartbeat::HeartbeatConfig;
use crate::infrastructure::session::stream::DEFAULT_CONNECT_TIMEOUT;

/// Upstream API credentials.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    api_secret: String,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(api_key: String, api_secret: String) -> Self {
        Self {
            api_key,
            api_secret,
        }
    }

    /// Get the API key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Get the API secret.
    #[must_use]
    pub fn api_secret(&self) -> &str {
        &self.api_secret
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"[REDACTED]")
            .field("api_secret", &"[REDACTED]")
            .finish()
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// WebSocket push and UDF query port.
    pub port: u16,
    /// Health check and metrics port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 8080,
            health_port: 8082,
        }
    }
}

/// Stream provider settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Binance futures WebSocket URL.
    pub binance_url: String,
    /// Bybit linear WebSocket URL.
    pub bybit_url: String,
    /// Blofin WebSocket URL.
    pub blofin_url: String,
    /// Alpaca WebSocket URL.
    pub alpaca_url: String,
    /// Alpaca credential sets, in index order. `None` disables that set.
    pub alpaca_credentials: [Option<Credentials>; 2],
    /// Binance futures REST root used by discovery.
    pub binance_rest_url: String,
    /// Bybit REST root used by discovery.
    pub bybit_rest_url: String,
    /// Cap on discovered symbols per provider.
    pub max_symbols_per_source: usize,
    /// Whether to discover symbols over REST before starting.
    pub discovery_enabled: bool,
    /// Ping cadence and pong deadline.
    pub heartbeat: HeartbeatConfig,
    /// Handshake deadline per connection attempt.
    pub connect_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            binance_url: binance::DEFAULT_URL.to_string(),
            bybit_url: bybit::DEFAULT_URL.to_string(),
            blofin_url: blofin::DEFAULT_URL.to_string(),
            alpaca_url: alpaca::DEFAULT_URL.to_string(),
            alpaca_credentials: [None, None],
            binance_rest_url: discovery::BINANCE_REST_URL.to_string(),
            bybit_rest_url: discovery::BYBIT_REST_URL.to_string(),
            max_symbols_per_source: 100,
            discovery_enabled: true,
            heartbeat: HeartbeatConfig::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Poll provider settings.
#[derive(Debug, Clone)]
pub struct PollSettings {
    /// GeckoTerminal API root.
    pub gecko_url: String,
    /// GeckoTerminal poll interval.
    pub gecko_interval: Duration,
    /// GeckoTerminal networks.
    pub gecko_networks: Vec<String>,
    /// The Odds API root.
    pub odds_url: String,
    /// The Odds API key. `None` disables the provider.
    pub odds_api_key: Option<String>,
    /// The Odds API poll interval.
    pub odds_interval: Duration,
    /// The Odds API price format.
    pub odds_format: odds::OddsFormat,
    /// Polymarket API root.
    pub polymarket_url: String,
    /// Polymarket poll interval.
    pub polymarket_interval: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            gecko_url: gecko::DEFAULT_API_URL.to_string(),
            gecko_interval: Duration::from_secs(60),
            gecko_networks: vec!["eth".to_string(), "bsc".to_string()],
            odds_url: odds::DEFAULT_API_URL.to_string(),
            odds_api_key: None,
            odds_interval: Duration::from_secs(30),
            odds_format: odds::OddsFormat::Decimal,
            polymarket_url: polymarket::DEFAULT_API_URL.to_string(),
            polymarket_interval: Duration::from_secs(15),
        }
    }
}

/// Per-provider reconnect policies.
#[derive(Debug, Clone)]
pub struct ReconnectSettings {
    /// Binance futures.
    pub binance: ReconnectConfig,
    /// Bybit linear.
    pub bybit: ReconnectConfig,
    /// Blofin.
    pub blofin: ReconnectConfig,
    /// Alpaca.
    pub alpaca: ReconnectConfig,
    /// Every poll session.
    pub poll: ReconnectConfig,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        let standard = ReconnectConfig::with_base(Duration::from_secs(5), 10);
        Self {
            binance: standard.clone(),
            bybit: standard.clone(),
            blofin: ReconnectConfig::with_base(Duration::from_secs(10), 5),
            alpaca: standard.clone(),
            poll: standard,
        }
    }
}

/// Session orchestrator settings.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Delay between consecutive stream session starts.
    pub stream_stagger: Duration,
    /// Delay before the first poll session starts.
    pub poll_start_delay: Duration,
    /// Delay between consecutive poll session starts.
    pub poll_stagger: Duration,
    /// Capacity of the session event channel.
    pub event_channel_capacity: usize,
    /// Bound on waiting for sessions to stop.
    pub shutdown_timeout: Duration,
    /// Cadence of the status log line.
    pub status_log_interval: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            stream_stagger: Duration::from_secs(1),
            poll_start_delay: Duration::from_secs(5),
            poll_stagger: Duration::from_secs(2),
            event_channel_capacity: 4096,
            shutdown_timeout: Duration::from_secs(10),
            status_log_interval: Duration::from_secs(60),
        }
    }
}

/// Cache side channel settings.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// TTL of OHLCV entries.
    pub ttl: Duration,
    /// Cadence of the expiry sweep.
    pub sweep_interval: Duration,
    /// Capacity of the write queue.
    pub write_queue: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(30),
            write_queue: 1024,
        }
    }
}

/// Complete aggregator configuration.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Server port settings.
    pub server: ServerSettings,
    /// Stream provider settings.
    pub streams: StreamSettings,
    /// Poll provider settings.
    pub polls: PollSettings,
    /// Reconnect policies.
    pub reconnect: ReconnectSettings,
    /// Orchestrator settings.
    pub orchestrator: OrchestratorSettings,
    /// Cache settings.
    pub cache: CacheSettings,
    /// Outbound queue depth per push subscriber.
    pub subscriber_queue_capacity: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            streams: StreamSettings::default(),
            polls: PollSettings::default(),
            reconnect: ReconnectSettings::default(),
            orchestrator: OrchestratorSettings::default(),
            cache: CacheSettings::default(),
            subscriber_queue_capacity: Self::DEFAULT_SUBSCRIBER_QUEUE,
        }
    }
}

impl AggregatorConfig {
    /// Default subscriber queue depth.
    pub const DEFAULT_SUBSCRIBER_QUEUE: usize = 256;

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a credential is half-configured or a value that
    /// must be positive is zero.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// See [`Self::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);

        let server_defaults = ServerSettings::default();
        let server = ServerSettings {
            port: env.parse("PORT", server_defaults.port),
            health_port: env.parse("HEALTH_PORT", server_defaults.health_port),
        };

        let stream_defaults = StreamSettings::default();
        let streams = StreamSettings {
            binance_url: env.string("BINANCE_WS_URL", stream_defaults.binance_url),
            bybit_url: env.string("BYBIT_WS_URL", stream_defaults.bybit_url),
            blofin_url: env.string("BLOFIN_WS_URL", stream_defaults.blofin_url),
            alpaca_url: env.string("ALPACA_WS_URL", stream_defaults.alpaca_url),
            alpaca_credentials: [
                env.credentials("ALPACA_API_KEY_1", "ALPACA_SECRET_KEY_1")?,
                env.credentials("ALPACA_API_KEY_2", "ALPACA_SECRET_KEY_2")?,
            ],
            binance_rest_url: env.string("BINANCE_REST_URL", stream_defaults.binance_rest_url),
            bybit_rest_url: env.string("BYBIT_REST_URL", stream_defaults.bybit_rest_url),
            max_symbols_per_source: env.parse(
                "MAX_SYMBOLS_PER_SOURCE",
                stream_defaults.max_symbols_per_source,
            ),
            discovery_enabled: env.flag("SYMBOL_DISCOVERY_ENABLED", stream_defaults.discovery_enabled),
            heartbeat: HeartbeatConfig {
                ping_interval: env.secs(
                    "HEARTBEAT_INTERVAL_SECS",
                    stream_defaults.heartbeat.ping_interval,
                ),
                pong_timeout: env.secs(
                    "HEARTBEAT_TIMEOUT_SECS",
                    stream_defaults.heartbeat.pong_timeout,
                ),
            },
            connect_timeout: env.secs("CONNECT_TIMEOUT_SECS", stream_defaults.connect_timeout),
        };

        let poll_defaults = PollSettings::default();
        let polls = PollSettings {
            gecko_url: env.string("GECKO_API_URL", poll_defaults.gecko_url),
            gecko_interval: env.millis("GECKO_POLL_INTERVAL", poll_defaults.gecko_interval),
            gecko_networks: env
                .get("GECKO_NETWORKS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|n| !n.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or(poll_defaults.gecko_networks),
            odds_url: env.string("ODDS_API_URL", poll_defaults.odds_url),
            odds_api_key: env.get("ODDS_API_KEY"),
            odds_interval: env.millis("ODDS_POLL_INTERVAL", poll_defaults.odds_interval),
            odds_format: env
                .get("ODDS_FORMAT")
                .map_or(poll_defaults.odds_format, |v| {
                    odds::OddsFormat::from_str_case_insensitive(&v)
                }),
            polymarket_url: env.string("POLYMARKET_API_URL", poll_defaults.polymarket_url),
            polymarket_interval: env.millis(
                "POLYMARKET_POLL_INTERVAL",
                poll_defaults.polymarket_interval,
            ),
        };

        let orchestrator_defaults = OrchestratorSettings::default();
        let orchestrator = OrchestratorSettings {
            stream_stagger: env.millis("STREAM_STAGGER_MS", orchestrator_defaults.stream_stagger),
            poll_start_delay: env.millis(
                "POLL_START_DELAY_MS",
                orchestrator_defaults.poll_start_delay,
            ),
            poll_stagger: env.millis("POLL_STAGGER_MS", orchestrator_defaults.poll_stagger),
            event_channel_capacity: env.positive(
                "EVENT_CHANNEL_CAPACITY",
                orchestrator_defaults.event_channel_capacity,
            )?,
            shutdown_timeout: env.secs(
                "SHUTDOWN_TIMEOUT_SECS",
                orchestrator_defaults.shutdown_timeout,
            ),
            status_log_interval: env.secs(
                "STATUS_LOG_INTERVAL_SECS",
                orchestrator_defaults.status_log_interval,
            ),
        };

        let cache_defaults = CacheSettings::default();
        let cache = CacheSettings {
            ttl: env.secs("CACHE_TTL_SECS", cache_defaults.ttl),
            sweep_interval: env.secs("CACHE_SWEEP_INTERVAL_SECS", cache_defaults.sweep_interval),
            write_queue: env.positive("CACHE_WRITE_QUEUE", cache_defaults.write_queue)?,
        };

        Ok(Self {
            server,
            streams,
            polls,
            reconnect: ReconnectSettings::default(),
            orchestrator,
            cache,
            subscriber_queue_capacity: env
                .positive("SUBSCRIBER_QUEUE_CAPACITY", Self::DEFAULT_SUBSCRIBER_QUEUE)?,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Only half of a key/secret pair is set.
    #[error("{present} is set but {missing} is not")]
    IncompleteCredentials {
        /// The variable that is set.
        present: String,
        /// The variable that is missing.
        missing: String,
    },
    /// A value that must be positive is zero.
    #[error("environment variable {0} must be greater than zero")]
    ZeroValue(String),
}

/// Environment lookup with the parsing helpers.
struct Env<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    /// Trimmed, non-empty value.
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: String) -> String {
        self.get(key).unwrap_or(default)
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn positive(&self, key: &str, default: usize) -> Result<usize, ConfigError> {
        match self.parse(key, default) {
            0 => Err(ConfigError::ZeroValue(key.to_string())),
            n => Ok(n),
        }
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        self.get(key).map_or(default, |v| {
            matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
        })
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }

    fn credentials(&self, key_var: &str, secret_var: &str) -> Result<Option<Credentials>, ConfigError> {
        match (self.get(key_var), self.get(secret_var)) {
            (Some(key), Some(secret)) => Ok(Some(Credentials::new(key, secret))),
            (None, None) => Ok(None),
            (Some(_), None) => Err(ConfigError::IncompleteCredentials {
                present: key_var.to_string(),
                missing: secret_var.to_string(),
            }),
            (None, Some(_)) => Err(ConfigError::IncompleteCredentials {
                present: secret_var.to_string(),
                missing: key_var.to_string(),
            }),
        }
    }
}
