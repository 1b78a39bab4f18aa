//! Binance USDT-margined futures klines.
//!
//! # Protocol
//!
//! - Subscribe: `{"method":"SUBSCRIBE","params":["btcusdt@kline_1m",..],"id":1}`
//! - Data: `{"e":"kline","s":"BTCUSDT","k":{"t":..,"o":..,"h":..,"l":..,"c":..,"v":..,"i":"1m"}}`
//! - Ack: `{"result":null,"id":1}`
//! - Error: `{"error":{"code":..,"msg":..},"id":1}`

use serde_json::{Value, json};

use crate::domain::normalize::{Provider, RawRecord};
use crate::infrastructure::session::{InboundMessage, ParseError, StreamProvider};

/// Production stream endpoint.
pub const DEFAULT_URL: &str = "wss://fstream.binance.com/ws";

/// Upstream cap on streams per connection.
pub const MAX_STREAMS_PER_CONNECTION: usize = 200;

/// Binance stream hooks.
#[derive(Debug, Clone)]
pub struct BinanceStream {
    url: String,
}

impl BinanceStream {
    /// Hooks for `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Default for BinanceStream {
    fn default() -> Self {
        Self::new(DEFAULT_URL)
    }
}

impl StreamProvider for BinanceStream {
    fn provider(&self) -> Provider {
        Provider::Binance
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
        let params: Vec<String> = symbols
            .iter()
            .map(|s| format!("{}@kline_1m", s.to_lowercase()))
            .collect();
        vec![json!({ "method": "SUBSCRIBE", "params": params, "id": 1 }).to_string()]
    }

    fn parse_message(&self, text: &str) -> Result<Vec<InboundMessage>, ParseError> {
        let message: Value = serde_json::from_str(text)?;

        if message.get("e").and_then(Value::as_str) == Some("kline") {
            let kline = message
                .get("k")
                .ok_or_else(|| ParseError::shape("kline event without k"))?;
            let raw = RawRecord {
                symbol: message.get("s").cloned(),
                timestamp: kline.get("t").cloned(),
                open: kline.get("o").cloned(),
                high: kline.get("h").cloned(),
                low: kline.get("l").cloned(),
                close: kline.get("c").cloned(),
                volume: kline.get("v").cloned(),
                interval: kline.get("i").and_then(Value::as_str).map(str::to_string),
                raw: kline.clone(),
                ..RawRecord::default()
            };
            return Ok(vec![InboundMessage::Data(raw)]);
        }

        if let Some(error) = message.get("error") {
            let reason = error
                .get("msg")
                .and_then(Value::as_str)
                .map_or_else(|| error.to_string(), str::to_string);
            return Ok(vec![InboundMessage::Error(reason)]);
        }

        Ok(vec![InboundMessage::Control])
    }
}
