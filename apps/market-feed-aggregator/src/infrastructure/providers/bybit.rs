//! Bybit linear perpetual klines.
//!
//! # Protocol
//!
//! - Subscribe: `{"op":"subscribe","args":["kline.1.BTCUSDT",..]}`, at most
//!   [`TOPICS_PER_BATCH`] topics per frame, [`BATCH_PACING`] apart
//! - Data: `{"topic":"kline.1.BTCUSDT","data":[{"start":..,"open":..,..,"interval":"1"}]}`
//! - Control: `{"op":"pong",..}`, `{"success":true,..}`

use std::time::Duration;

use serde_json::{Value, json};

use crate::domain::normalize::{Provider, RawRecord};
use crate::infrastructure::session::{InboundMessage, ParseError, StreamProvider};

/// Production stream endpoint.
pub const DEFAULT_URL: &str = "wss://stream.bybit.com/v5/public/linear";

/// Topics per subscribe frame.
pub const TOPICS_PER_BATCH: usize = 10;

/// Delay between subscribe frames.
pub const BATCH_PACING: Duration = Duration::from_millis(100);

/// Streams per connection.
pub const MAX_STREAMS_PER_CONNECTION: usize = 200;

/// Bybit stream hooks.
#[derive(Debug, Clone)]
pub struct BybitStream {
    url: String,
}

impl BybitStream {
    /// Hooks for `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Default for BybitStream {
    fn default() -> Self {
        Self::new(DEFAULT_URL)
    }
}

impl StreamProvider for BybitStream {
    fn provider(&self) -> Provider {
        Provider::Bybit
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn max_streams(&self) -> usize {
        MAX_STREAMS_PER_CONNECTION
    }

    fn subscribe_frames(&self, symbols: &[String]) -> Vec<String> {
        symbols
            .chunks(TOPICS_PER_BATCH)
            .map(|batch| {
                let args: Vec<String> = batch.iter().map(|s| format!("kline.1.{s}")).collect();
                json!({ "op": "subscribe", "args": args }).to_string()
            })
            .collect()
    }

    fn subscribe_pacing(&self) -> Duration {
        BATCH_PACING
    }

    fn parse_message(&self, text: &str) -> Result<Vec<InboundMessage>, ParseError> {
        let message: Value = serde_json::from_str(text)?;

        if let Some(topic) = message.get("topic").and_then(Value::as_str)
            && topic.contains("kline")
        {
            let data = message
                .get("data")
                .and_then(Value::as_array)
                .and_then(|d| d.first())
                .ok_or_else(|| ParseError::shape("kline topic without data"))?;

            let symbol = data
                .get("symbol")
                .cloned()
                .or_else(|| topic.split('.').nth(2).map(|s| Value::String(s.to_string())));

            let raw = RawRecord {
                symbol,
                timestamp: data.get("start").cloned(),
                open: data.get("open").cloned(),
                high: data.get("high").cloned(),
                low: data.get("low").cloned(),
                close: data.get("close").cloned(),
                volume: data.get("volume").cloned(),
                interval: data.get("interval").and_then(Value::as_str).map(str::to_string),
                raw: data.clone(),
                ..RawRecord::default()
            };
            return Ok(vec![InboundMessage::Data(raw)]);
        }

        if message.get("success").and_then(Value::as_bool) == Some(false) {
            let reason = message
                .get("ret_msg")
                .and_then(Value::as_str)
                .unwrap_or("subscription rejected")
                .to_string();
            return Ok(vec![InboundMessage::Error(reason)]);
        }

        Ok(vec![InboundMessage::Control])
    }
}
