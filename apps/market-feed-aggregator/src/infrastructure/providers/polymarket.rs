//! Polymarket prediction markets.
//!
//! Polls the top markets by volume. Each market condition becomes a point
//! `POLY:{slug|id}:{condition}` whose probability is the condition's last
//! traded price.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::normalize::{Provider, RawRecord};
use crate::infrastructure::session::poll::get_json;
use crate::infrastructure::session::{PollProvider, SessionError};

/// Public API root.
pub const DEFAULT_API_URL: &str = "https://gamma-api.polymarket.com";

/// Markets fetched per poll.
pub const MARKET_LIMIT: &str = "10";

/// Probability assumed when a condition has never traded.
const DEFAULT_PRICE: f64 = 0.5;

/// Polymarket poll hooks.
#[derive(Debug, Clone)]
pub struct PolymarketPoll {
    api_url: String,
    interval: Duration,
}

impl PolymarketPoll {
    /// Hooks for `api_url`.
    #[must_use]
    pub fn new(api_url: impl Into<String>, interval: Duration) -> Self {
        Self {
            api_url: api_url.into(),
            interval,
        }
    }
}

fn id_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Points for every condition of a market.
fn market_points(market: &Value) -> Vec<RawRecord> {
    let Some(market_id) = id_text(market.get("slug")).or_else(|| id_text(market.get("id"))) else {
        return Vec::new();
    };
    let volume = market.get("volume").cloned();

    market
        .get("conditions")
        .and_then(Value::as_array)
        .map(|conditions| {
            conditions
                .iter()
                .filter_map(|condition| {
                    let condition_id = id_text(condition.get("id"))?;
                    let probability = condition
                        .get("lastPrice")
                        .filter(|p| !p.is_null())
                        .cloned()
                        .unwrap_or_else(|| Value::from(DEFAULT_PRICE));
                    Some(RawRecord {
                        symbol: Some(Value::String(format!("POLY:{market_id}:{condition_id}"))),
                        probability: Some(probability),
                        volume: volume.clone(),
                        raw: condition.clone(),
                        ..RawRecord::default()
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl PollProvider for PolymarketPoll {
    fn provider(&self) -> Provider {
        Provider::Polymarket
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn poll(&self, client: &reqwest::Client) -> Result<Vec<RawRecord>, SessionError> {
        let url = format!("{}/markets", self.api_url);
        let body = get_json(
            client,
            &url,
            &[
                ("limit", MARKET_LIMIT),
                ("active", "true"),
                ("order_by", "volume"),
                ("order_dir", "desc"),
            ],
        )
        .await?;

        Ok(body
            .as_array()
            .map(|markets| markets.iter().flat_map(market_points).collect())
            .unwrap_or_default())
    }
}
