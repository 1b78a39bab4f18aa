//! The Odds API sports markets.
//!
//! Each poll lists sports, keeps the active ones among [`TRACKED_SPORTS`],
//! then fetches h2h odds per sport. Every outcome of the first bookmaker's
//! h2h market becomes a point `ODDS:{sport}:{event}:{outcome}` carrying the
//! implied probability.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::normalize::{Provider, RawRecord};
use crate::infrastructure::session::poll::get_json;
use crate::infrastructure::session::{PollProvider, SessionError};

/// Public API root.
pub const DEFAULT_API_URL: &str = "https://api.the-odds-api.com/v4";

/// Sports polled when active upstream.
pub const TRACKED_SPORTS: [&str; 3] = ["basketball_nba", "americanfootball_nfl", "soccer_epl"];

const BOOKMAKERS: &str = "fanduel,draftkings";

/// Price format requested from upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OddsFormat {
    /// Decimal odds (`2.5`).
    #[default]
    Decimal,
    /// American moneyline odds (`+150`, `-200`).
    American,
}

impl OddsFormat {
    /// Parse a format name; anything but `american` is decimal.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("american") {
            Self::American
        } else {
            Self::Decimal
        }
    }

    /// Query-string value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Decimal => "decimal",
            Self::American => "american",
        }
    }

    /// Implied probability of a price in this format, or `None` for prices
    /// that imply nothing (zero or negative decimal odds).
    #[must_use]
    pub fn probability(self, price: f64) -> Option<f64> {
        match self {
            Self::Decimal if price > 0.0 => Some(1.0 / price),
            Self::Decimal => None,
            Self::American if price > 0.0 => Some(100.0 / (price + 100.0)),
            Self::American => Some(price.abs() / (price.abs() + 100.0)),
        }
    }
}

/// Odds API poll hooks.
#[derive(Debug, Clone)]
pub struct OddsApiPoll {
    api_url: String,
    api_key: String,
    format: OddsFormat,
    interval: Duration,
}

impl OddsApiPoll {
    /// Hooks for `api_url` authenticated with `api_key`.
    #[must_use]
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>, interval: Duration) -> Self {
        Self {
            api_url: api_url.into(),
            api_key: api_key.into(),
            format: OddsFormat::Decimal,
            interval,
        }
    }

    /// Request prices in `format`.
    #[must_use]
    pub const fn with_format(mut self, format: OddsFormat) -> Self {
        self.format = format;
        self
    }

    async fn active_sports(&self, client: &reqwest::Client) -> Result<Vec<String>, SessionError> {
        let url = format!("{}/sports", self.api_url);
        let body = get_json(client, &url, &[("apiKey", &self.api_key)]).await?;

        let active = body
            .as_array()
            .map(|sports| {
                sports
                    .iter()
                    .filter(|s| s.get("active").and_then(Value::as_bool).unwrap_or(false))
                    .filter_map(|s| s.get("key").and_then(Value::as_str))
                    .filter(|key| TRACKED_SPORTS.contains(key))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(active)
    }

    async fn sport_odds(
        &self,
        client: &reqwest::Client,
        sport: &str,
    ) -> Result<Vec<RawRecord>, SessionError> {
        let url = format!("{}/sports/{sport}/odds", self.api_url);
        let body = get_json(
            client,
            &url,
            &[
                ("apiKey", &self.api_key),
                ("regions", "us"),
                ("markets", "h2h"),
                ("oddsFormat", self.format.as_str()),
                ("bookmakers", BOOKMAKERS),
            ],
        )
        .await?;

        let records = body
            .as_array()
            .map(|events| {
                events
                    .iter()
                    .flat_map(|event| event_points(event, sport, self.format))
                    .collect()
            })
            .unwrap_or_default();
        Ok(records)
    }
}

/// Points for every outcome of the first bookmaker's h2h market.
fn event_points(event: &Value, sport: &str, format: OddsFormat) -> Vec<RawRecord> {
    let Some(event_id) = event.get("id").and_then(Value::as_str) else {
        return Vec::new();
    };
    let outcomes = event
        .get("bookmakers")
        .and_then(Value::as_array)
        .and_then(|b| b.first())
        .and_then(|bookmaker| bookmaker.get("markets"))
        .and_then(Value::as_array)
        .and_then(|markets| {
            markets
                .iter()
                .find(|m| m.get("key").and_then(Value::as_str) == Some("h2h"))
        })
        .and_then(|market| market.get("outcomes"))
        .and_then(Value::as_array);

    let Some(outcomes) = outcomes else {
        return Vec::new();
    };

    outcomes
        .iter()
        .filter_map(|outcome| {
            let name = outcome.get("name").and_then(Value::as_str)?;
            let probability = format.probability(outcome.get("price").and_then(Value::as_f64)?)?;
            Some(RawRecord {
                symbol: Some(Value::String(format!("ODDS:{sport}:{event_id}:{name}"))),
                timestamp: event.get("commence_time").cloned(),
                probability: Some(Value::from(probability)),
                raw: outcome.clone(),
                ..RawRecord::default()
            })
        })
        .collect()
}

#[async_trait]
impl PollProvider for OddsApiPoll {
    fn provider(&self) -> Provider {
        Provider::OddsApi
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn poll(&self, client: &reqwest::Client) -> Result<Vec<RawRecord>, SessionError> {
        let sports = self.active_sports(client).await?;
        let mut records = Vec::new();

        for sport in &sports {
            match self.sport_odds(client, sport).await {
                Ok(mut points) => records.append(&mut points),
                Err(SessionError::RateLimited) => return Err(SessionError::RateLimited),
                Err(e) => tracing::warn!(sport, error = %e, "OddsAPI: odds fetch failed"),
            }
        }

        tracing::debug!(sports = sports.len(), points = records.len(), "OddsAPI poll complete");
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::normalize::normalize_at;
    use crate::domain::record::Resolution;
    use serde_json::json;
    use test_case::test_case;

    #[test_case(OddsFormat::Decimal, 2.0, 0.5 ; "decimal evens")]
    #[test_case(OddsFormat::Decimal, 4.0, 0.25 ; "decimal long shot")]
    #[test_case(OddsFormat::American, 150.0, 0.4 ; "american underdog")]
    #[test_case(OddsFormat::American, -200.0, 2.0 / 3.0 ; "american favourite")]
    fn implied_probability(format: OddsFormat, price: f64, expected: f64) {
        let p = format.probability(price).unwrap();
        assert!((p - expected).abs() < 1e-12, "{p} != {expected}");
    }

    #[test]
    fn zero_decimal_price_is_skipped() {
        assert_eq!(OddsFormat::Decimal.probability(0.0), None);
    }

    #[test]
    fn format_parsing() {
        assert_eq!(OddsFormat::from_str_case_insensitive("American"), OddsFormat::American);
        assert_eq!(OddsFormat::from_str_case_insensitive("other"), OddsFormat::Decimal);
    }

    #[test]
    fn first_bookmaker_outcomes_become_points() {
        let event = json!({
            "id": "e1",
            "commence_time": "2024-01-02T00:00:00Z",
            "bookmakers": [
                {"key": "fanduel", "markets": [{"key": "h2h", "outcomes": [
                    {"name": "Lakers", "price": 2.0},
                    {"name": "Celtics", "price": 1.8}
                ]}]},
                {"key": "draftkings", "markets": [{"key": "h2h", "outcomes": [
                    {"name": "Lakers", "price": 2.1}
                ]}]}
            ]
        });

        let points = event_points(&event, "basketball_nba", OddsFormat::Decimal);
        assert_eq!(points.len(), 2);

        let record = normalize_at(points[0].clone(), Provider::OddsApi, 0).unwrap();
        assert_eq!(record.key().to_string(), "oddsapi:ODDS:basketball_nba:e1:Lakers");
        assert_eq!(record.resolution, Resolution::Event);
        assert_eq!(record.close, 0.5);
        assert_eq!(record.timestamp, 1_704_153_600_000);
    }

    #[test]
    fn event_without_bookmakers_yields_nothing() {
        let event = json!({"id": "e1", "bookmakers": []});
        assert!(event_points(&event, "soccer_epl", OddsFormat::Decimal).is_empty());
    }
}
