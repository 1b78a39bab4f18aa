//! Alpaca stock bars.
//!
//! # Authentication Flow
//!
//! 1. Connect; server sends `[{"T":"success","msg":"connected"}]`
//! 2. Send `{"action":"auth","key":"...","secret":"..."}`
//! 3. Receive `[{"T":"success","msg":"authenticated"}]` or `[{"T":"error",..}]`
//! 4. Send `{"action":"subscribe","bars":[..]}`
//!
//! Frames are JSON arrays. Bars have `T == "b"` with `S,t,o,h,l,c,v`, where
//! `t` is RFC 3339.

use serde_json::{Value, json};

use crate::domain::normalize::{Provider, RawRecord};
use crate::infrastructure::config::Credentials;
use crate::infrastructure::session::{InboundMessage, ParseError, StreamProvider};

/// Production SIP endpoint.
pub const DEFAULT_URL: &str = "wss://stream.data.alpaca.markets/v2/sip";

/// Symbols carried by the first credential set.
pub const SYMBOL_SET_1: [&str; 3] = ["AAPL", "MSFT", "GOOGL"];

/// Symbols carried by the second credential set.
pub const SYMBOL_SET_2: [&str; 3] = ["TSLA", "NVDA", "AMZN"];

/// Bars per connection.
pub const MAX_STREAMS_PER_CONNECTION: usize = 1000;

/// Alpaca stream hooks for one credential set.
#[derive(Debug, Clone)]
pub struct AlpacaStream {
    url: String,
    credentials: Credentials,
    source: String,
}

impl AlpacaStream {
    /// Hooks for credential set `index` (1-based, used in the source tag).
    #[must_use]
    pub fn new(url: impl Into<String>, credentials: Credentials, index: usize) -> Self {
        Self {
            url: url.into(),
            credentials,
            source: format!("alpaca_{index}"),
        }
    }

    /// Source tag stamped on records (`alpaca_1`, `alpaca_2`).
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    fn parse_item(&self, item: &Value) -> InboundMessage {
        match item.get("T").and_then(Value::as_str) {
            Some("b") => InboundMessage::Data(RawRecord {
                symbol: item.get("S").cloned(),
                timestamp: item.get("t").cloned(),
                open: item.get("o").cloned(),
                high: item.get("h").cloned(),
                low: item.get("l").cloned(),
                close: item.get("c").cloned(),
                volume: item.get("v").cloned(),
                interval: Some("1m".to_string()),
                source: Some(self.source.clone()),
                raw: item.clone(),
                ..RawRecord::default()
            }),
            Some("success") if item.get("msg").and_then(Value::as_str) == Some("authenticated") => {
                InboundMessage::Authenticated
            }
            Some("error") => {
                let code = item.get("code").and_then(Value::as_i64).unwrap_or_default();
                let msg = item.get("msg").and_then(Value::as_str).unwrap_or("unknown error");
                InboundMessage::Error(format!("{code}: {msg}"))
            }
            _ => InboundMessage::Control,
        }
    }
}

impl StreamProvider for AlpacaStream {
    fn provider(&self) -> Provider {
        Provider::Alpaca
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn max_streams(&self) -> usize {
        MAX_STREAMS_PER_CONNECTION
    }

    fn requires_auth(&self) -> bool {
        true
    }

    fn on_connected(&self) -> Vec<String> {
        vec![
            json!({
                "action": "auth",
                "key": self.credentials.api_key(),
                "secret": self.credentials.api_secret(),
            })
            .to_string(),
        ]
    }

    fn subscribe_frames(&self, symbols: &[String]) -> Vec<String> {
        if symbols.is_empty() {
            return Vec::new();
        }
        vec![json!({ "action": "subscribe", "bars": symbols }).to_string()]
    }

    fn parse_message(&self, text: &str) -> Result<Vec<InboundMessage>, ParseError> {
        match serde_json::from_str::<Value>(text)? {
            Value::Array(items) => Ok(items.iter().map(|item| self.parse_item(item)).collect()),
            item @ Value::Object(_) => Ok(vec![self.parse_item(&item)]),
            other => Err(ParseError::shape(format!("expected array, got {other}"))),
        }
    }
}
