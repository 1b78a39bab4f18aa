//! Blofin candlesticks.
//!
//! # Protocol
//!
//! - Subscribe: `{"op":"subscribe","args":[{"channel":"candlesticks","instId":"BTC-USDT","bar":"1m"}]}`
//! - Data: `{"arg":{"channel":"candlesticks","instId":"BTC-USDT"},"data":[["ts","o","h","l","c","v",..]]}`
//! - Events: `{"event":"subscribe",..}`, `{"event":"error","msg":..}`

use serde_json::{Value, json};

use crate::domain::normalize::{Provider, RawRecord};
use crate::infrastructure::session::{InboundMessage, ParseError, StreamProvider};

/// Production stream endpoint.
pub const DEFAULT_URL: &str = "wss://openapi.blofin.com/ws";

/// Instruments subscribed when discovery is not used.
pub const DEFAULT_INSTRUMENTS: [&str; 3] = ["BTC-USDT", "ETH-USDT", "SOL-USDT"];

/// Streams per connection.
pub const MAX_STREAMS_PER_CONNECTION: usize = 100;

/// Blofin stream hooks.
#[derive(Debug, Clone)]
pub struct BlofinStream {
    url: String,
}

impl BlofinStream {
    /// Hooks for `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Default for BlofinStream {
    fn default() -> Self {
        Self::new(DEFAULT_URL)
    }
}

impl StreamProvider for BlofinStream {
    fn provider(&self) -> Provider {
        Provider::Blofin
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn max_streams(&self) -> usize {
        MAX_STREAMS_PER_CONNECTION
    }

    fn subscribe_frames(&self, symbols: &[String]) -> Vec<String> {
        if symbols.is_empty() {
            return Vec::new();
        }
        let args: Vec<Value> = symbols
            .iter()
            .map(|inst| json!({ "channel": "candlesticks", "instId": inst, "bar": "1m" }))
            .collect();
        vec![json!({ "op": "subscribe", "args": args }).to_string()]
    }

    fn parse_message(&self, text: &str) -> Result<Vec<InboundMessage>, ParseError> {
        let message: Value = serde_json::from_str(text)?;

        match message.get("event").and_then(Value::as_str) {
            Some("error") => {
                let reason = message
                    .get("msg")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string();
                return Ok(vec![InboundMessage::Error(reason)]);
            }
            Some(_) => return Ok(vec![InboundMessage::Control]),
            None => {}
        }

        let Some(arg) = message.get("arg") else {
            return Ok(vec![InboundMessage::Control]);
        };
        if arg.get("channel").and_then(Value::as_str) != Some("candlesticks") {
            return Ok(vec![InboundMessage::Control]);
        }

        let candle = message
            .get("data")
            .and_then(Value::as_array)
            .and_then(|d| d.first())
            .and_then(Value::as_array)
            .ok_or_else(|| ParseError::shape("candlesticks without data"))?;

        let field = |i: usize| candle.get(i).cloned();
        let raw = RawRecord {
            symbol: arg.get("instId").cloned(),
            timestamp: field(0),
            open: field(1),
            high: field(2),
            low: field(3),
            close: field(4),
            volume: field(5),
            interval: Some("1m".to_string()),
            raw: Value::Array(candle.clone()),
            ..RawRecord::default()
        };
        Ok(vec![InboundMessage::Data(raw)])
    }
}
