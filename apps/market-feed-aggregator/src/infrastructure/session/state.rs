//! Session lifecycle state.
//!
//! `Disconnected → Connecting → Connected → Reconnecting → Connecting → … → Stopped`.
//! `Stopped` is terminal. Each session publishes its state through a shared
//! [`SessionStatus`] that the orchestrator and health server read.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

/// Lifecycle state of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Not connected and not trying.
    Disconnected,
    /// Establishing a connection.
    Connecting,
    /// Connection established and accepted.
    Connected,
    /// Waiting out a backoff delay.
    Reconnecting,
    /// Terminal.
    Stopped,
}

impl SessionState {
    /// Lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Stopped => "stopped",
        }
    }
}

/// Push or timer-driven session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    /// WebSocket push session.
    Stream,
    /// Periodic HTTP poll session.
    Poll,
}

impl SessionKind {
    /// Lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stream => "stream",
            Self::Poll => "poll",
        }
    }
}

/// Shared, lock-light view of one session.
#[derive(Debug)]
pub struct SessionStatus {
    name: String,
    kind: SessionKind,
    state: RwLock<SessionState>,
    last_connected_at: RwLock<Option<DateTime<Utc>>>,
    error_message: RwLock<Option<String>>,
    reconnect_attempts: AtomicU32,
    records_received: AtomicU64,
    parse_errors: AtomicU64,
    streams: AtomicUsize,
}

impl SessionStatus {
    /// New status in `Disconnected`.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: SessionKind) -> Self {
        Self {
            name: name.into(),
            kind,
            state: RwLock::new(SessionState::Disconnected),
            last_connected_at: RwLock::new(None),
            error_message: RwLock::new(None),
            reconnect_attempts: AtomicU32::new(0),
            records_received: AtomicU64::new(0),
            parse_errors: AtomicU64::new(0),
            streams: AtomicUsize::new(0),
        }
    }

    /// Session name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Session kind.
    #[must_use]
    pub const fn kind(&self) -> SessionKind {
        self.kind
    }

    /// Transition to `state`. Entering `Connected` clears the attempt counter
    /// and the last error.
    pub fn set_state(&self, state: SessionState) {
        *self.state.write() = state;
        if state == SessionState::Connected {
            *self.last_connected_at.write() = Some(Utc::now());
            self.reconnect_attempts.store(0, Ordering::Relaxed);
            *self.error_message.write() = None;
        }
    }

    /// Remember the most recent failure.
    pub fn set_error(&self, message: String) {
        *self.error_message.write() = Some(message);
    }

    /// Record the current backoff attempt.
    pub fn set_reconnect_attempts(&self, attempts: u32) {
        self.reconnect_attempts.store(attempts, Ordering::Relaxed);
    }

    /// Count a record handed to the orchestrator.
    pub fn increment_records(&self) {
        self.records_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a dropped frame.
    pub fn increment_parse_errors(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of upstream streams (topics) this session carries.
    pub fn set_streams(&self, streams: usize) {
        self.streams.store(streams, Ordering::Relaxed);
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Whether the session is `Connected`.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Streams carried.
    #[must_use]
    pub fn streams(&self) -> usize {
        self.streams.load(Ordering::Relaxed)
    }

    /// Records received so far.
    #[must_use]
    pub fn records_received(&self) -> u64 {
        self.records_received.load(Ordering::Relaxed)
    }

    /// Serializable point-in-time copy.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            name: self.name.clone(),
            kind: self.kind,
            state: self.state(),
            last_connected_at: *self.last_connected_at.read(),
            error: self.error_message.read().clone(),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            records_received: self.records_received(),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            streams: self.streams(),
        }
    }
}

/// Health-report view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    /// Session name.
    pub name: String,
    /// Push or poll.
    pub kind: SessionKind,
    /// Lifecycle state.
    pub state: SessionState,
    /// Last time the session reached `Connected`.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Last failure, cleared on connect.
    pub error: Option<String>,
    /// Current backoff attempt.
    pub reconnect_attempts: u32,
    /// Records forwarded.
    pub records_received: u64,
    /// Frames dropped as unparseable.
    pub parse_errors: u64,
    /// Upstream streams carried.
    pub streams: usize,
}
