//! Push protocol messages.
//!
//! JSON objects tagged by `type`. Client messages are parsed leniently:
//! anything that does not match a known shape becomes an `error` reply, never
//! a disconnect.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message from a subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Add a symbol, optionally restricting indicators.
    Subscribe {
        /// `exchange:symbol` or a bare symbol.
        symbol: String,
        /// Indicator names; empty means all.
        #[serde(default)]
        indicators: Vec<String>,
    },
    /// Remove one symbol, or everything when `symbol` is absent.
    Unsubscribe {
        /// Symbol to remove.
        #[serde(default)]
        symbol: Option<String>,
    },
    /// Liveness check.
    Ping,
    /// List known symbols.
    ListSymbols,
}

impl ClientMessage {
    /// Parse a text frame.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason for malformed or unknown messages.
    pub fn parse(text: &str) -> Result<Self, String> {
        serde_json::from_str(text).map_err(|e| format!("invalid message: {e}"))
    }
}

/// Message to a subscriber.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// First message on every connection.
    Welcome {
        /// Server-assigned subscriber id.
        #[serde(rename = "clientId")]
        client_id: String,
    },
    /// Subscribe acknowledgement.
    Subscribed {
        /// Normalized `exchange:symbol`.
        symbol: String,
        /// Indicator filter now in effect.
        indicators: Vec<String>,
    },
    /// Single-symbol unsubscribe acknowledgement.
    Unsubscribed {
        /// Normalized `exchange:symbol`.
        symbol: String,
    },
    /// Unsubscribe-all acknowledgement.
    UnsubscribedAll,
    /// Ping reply.
    Pong {
        /// Server time (ms).
        timestamp: i64,
    },
    /// Known symbols.
    SymbolList {
        /// `exchange:symbol` keys.
        symbols: Vec<String>,
    },
    /// Request could not be served.
    Error {
        /// Reason.
        message: String,
    },
    /// Enriched record for a subscribed symbol.
    OhlcvUpdate {
        /// The enriched record, indicators filtered per subscription. Shared
        /// by every subscriber with the same filter.
        data: Arc<Value>,
        /// Server time (ms).
        timestamp: i64,
    },
}

impl ServerMessage {
    /// Error reply.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Serialize to a text frame.
    #[must_use]
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"type":"error","message":"encode failed: {e}"}}"#)
        })
    }
}
