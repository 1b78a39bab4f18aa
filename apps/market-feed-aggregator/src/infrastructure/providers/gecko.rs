//! GeckoTerminal DEX pool snapshots.
//!
//! Polls `GET {api}/networks/{network}/pools?page=1` per network and keeps
//! the first [`POOLS_PER_NETWORK`] pools. Each pool becomes a `24h` record
//! whose OHLC are all the base token's USD price.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::normalize::{Provider, RawRecord};
use crate::infrastructure::session::poll::get_json;
use crate::infrastructure::session::{PollProvider, SessionError};

/// Public API root.
pub const DEFAULT_API_URL: &str = "https://api.geckoterminal.com/api/v2";

/// Pools kept per network.
pub const POOLS_PER_NETWORK: usize = 5;

/// GeckoTerminal poll hooks.
#[derive(Debug, Clone)]
pub struct GeckoTerminalPoll {
    api_url: String,
    networks: Vec<String>,
    interval: Duration,
}

impl GeckoTerminalPoll {
    /// Hooks for `networks` under `api_url`.
    #[must_use]
    pub fn new(api_url: impl Into<String>, networks: Vec<String>, interval: Duration) -> Self {
        Self {
            api_url: api_url.into(),
            networks,
            interval,
        }
    }

    async fn poll_network(
        &self,
        client: &reqwest::Client,
        network: &str,
    ) -> Result<Vec<RawRecord>, SessionError> {
        let url = format!("{}/networks/{network}/pools", self.api_url);
        let body = get_json(client, &url, &[("page", "1")]).await?;

        let pools = body
            .get("data")
            .and_then(Value::as_array)
            .map(|pools| pools.iter().take(POOLS_PER_NETWORK).filter_map(pool_record).collect())
            .unwrap_or_default();
        Ok(pools)
    }
}

/// Map one pool object to a raw record. Pools without attributes are skipped.
fn pool_record(pool: &Value) -> Option<RawRecord> {
    let attributes = pool.get("attributes")?;
    let text = |key: &str, default: &str| {
        attributes
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(default)
            .to_string()
    };
    let symbol = format!(
        "{}_{}",
        text("base_token_symbol", "TOKEN"),
        text("quote_token_symbol", "USDT")
    );
    let price = attributes.get("base_token_price_usd").cloned();

    Some(RawRecord {
        symbol: Some(Value::String(symbol)),
        open: price.clone(),
        high: price.clone(),
        low: price.clone(),
        close: price,
        volume: attributes.get("volume_usd").and_then(|v| v.get("h24")).cloned(),
        interval: Some("24h".to_string()),
        raw: pool.clone(),
        ..RawRecord::default()
    })
}

#[async_trait]
impl PollProvider for GeckoTerminalPoll {
    fn provider(&self) -> Provider {
        Provider::GeckoTerminal
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn poll(&self, client: &reqwest::Client) -> Result<Vec<RawRecord>, SessionError> {
        let mut records = Vec::new();
        let mut last_error = None;

        for network in &self.networks {
            match self.poll_network(client, network).await {
                Ok(mut pools) => records.append(&mut pools),
                Err(e) => {
                    tracing::warn!(network, error = %e, "GeckoTerminal: skipping network");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if records.is_empty() => Err(e),
            _ => Ok(records),
        }
    }
}
