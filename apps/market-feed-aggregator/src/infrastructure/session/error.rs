//! Session errors.

/// Connection-class failures. Every variant except
/// [`SessionError::ChannelClosed`] and [`SessionError::RateLimited`] triggers
/// backoff and reconnect until the attempt cap is reached.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Peer closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// The WebSocket handshake did not complete in time.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),

    /// A ping went unanswered.
    #[error("heartbeat timeout")]
    HeartbeatTimeout,

    /// Upstream rejected the credentials.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Backoff exhausted.
    #[error("maximum reconnection attempts exceeded")]
    MaxReconnectAttemptsExceeded,

    /// The orchestrator's event channel is gone.
    #[error("event channel closed")]
    ChannelClosed,

    /// Upstream answered with a non-success status.
    #[error("upstream returned status {status}")]
    Upstream {
        /// HTTP status code.
        status: u16,
    },

    /// Upstream asked us to slow down (HTTP 429).
    #[error("upstream rate limit")]
    RateLimited,
}

impl SessionError {
    /// Whether this error ends the session without reconnecting.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::ChannelClosed | Self::MaxReconnectAttemptsExceeded)
    }
}

/// A single inbound frame or response body could not be understood.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// Not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Valid JSON with an unexpected shape.
    #[error("unexpected message shape: {0}")]
    Shape(String),
}

impl ParseError {
    /// Unexpected-shape error.
    pub fn shape(message: impl Into<String>) -> Self {
        Self::Shape(message.into())
    }
}
