//! Stream Session
//!
//! Generic WebSocket session engine. Provider behavior (URL, handshake
//! frames, subscription payloads, frame parsing) comes from a
//! [`StreamProvider`]; connection lifecycle, heartbeat and backoff live here.
//!
//! # Lifecycle
//!
//! 1. Connect and send the provider's `on_connected` frames
//! 2. Providers without authentication enter `Connected` immediately;
//!    authenticated providers enter it on the first `Authenticated` frame
//! 3. Send subscription frames in batches, pacing between batches
//! 4. Forward data frames until the socket fails, then back off and retry

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatMonitor, HeartbeatState};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use super::state::{SessionKind, SessionState, SessionStatus};
use super::{ParseError, Retry, Session, SessionError, SessionEvent, backoff, finish, forward_raw};
use crate::domain::normalize::{Provider, RawRecord};
use crate::infrastructure::metrics;

/// Default deadline for the TCP, TLS and WebSocket handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Provider Hooks
// =============================================================================

/// One parsed inbound frame.
#[derive(Debug, Clone)]
pub enum InboundMessage {
    /// A market data record.
    Data(RawRecord),
    /// Upstream accepted our credentials.
    Authenticated,
    /// Acknowledgement, pong or other non-data frame.
    Control,
    /// Upstream reported an error. Before authentication this is fatal for
    /// the connection.
    Error(String),
}

/// Provider-specific behavior for a stream session.
pub trait StreamProvider: Send + Sync + 'static {
    /// Normalization rules for this provider.
    fn provider(&self) -> Provider;

    /// WebSocket URL.
    fn url(&self) -> &str;

    /// Maximum streams one connection may carry.
    fn max_streams(&self) -> usize;

    /// Whether data is accepted only after an `Authenticated` frame.
    fn requires_auth(&self) -> bool {
        false
    }

    /// Frames sent immediately after the socket opens.
    fn on_connected(&self) -> Vec<String> {
        Vec::new()
    }

    /// Subscription frames for `symbols`, one per batch.
    fn subscribe_frames(&self, symbols: &[String]) -> Vec<String>;

    /// Delay between subscription batches.
    fn subscribe_pacing(&self) -> Duration {
        Duration::ZERO
    }

    /// Parse one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] for malformed frames. The session drops them.
    fn parse_message(&self, text: &str) -> Result<Vec<InboundMessage>, ParseError>;
}

// =============================================================================
// Stream Session
// =============================================================================

/// WebSocket session for one provider connection.
pub struct StreamSession<P> {
    provider: P,
    symbols: Vec<String>,
    reconnect: ReconnectConfig,
    heartbeat: HeartbeatConfig,
    connect_timeout: Duration,
    status: Arc<SessionStatus>,
}

impl<P: StreamProvider> StreamSession<P> {
    /// Create a session carrying `symbols`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        provider: P,
        symbols: Vec<String>,
        reconnect: ReconnectConfig,
    ) -> Self {
        let status = Arc::new(SessionStatus::new(name, SessionKind::Stream));
        status.set_streams(symbols.len());
        Self {
            provider,
            symbols,
            reconnect,
            heartbeat: HeartbeatConfig::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            status,
        }
    }

    /// Override the heartbeat cadence.
    #[must_use]
    pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Override the handshake deadline.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Symbols carried by this connection.
    #[must_use]
    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    async fn run_loop(
        &self,
        events: &mpsc::Sender<SessionEvent>,
        cancel: &CancellationToken,
    ) -> Result<(), SessionError> {
        let mut policy = ReconnectPolicy::new(self.reconnect.clone());

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            self.status.set_state(SessionState::Connecting);
            match self.connect_and_run(events, cancel, &mut policy).await {
                Ok(()) => return Ok(()),
                Err(SessionError::ChannelClosed) => return Err(SessionError::ChannelClosed),
                Err(e) => {
                    tracing::warn!(session = %self.status.name(), error = %e, "Stream connection error");
                    self.status.set_error(e.to_string());
                    match backoff(&mut policy, &self.status, cancel).await? {
                        Retry::Again => {}
                        Retry::Cancelled => return Ok(()),
                    }
                }
            }
        }
    }

    async fn connect_and_run(
        &self,
        events: &mpsc::Sender<SessionEvent>,
        cancel: &CancellationToken,
        policy: &mut ReconnectPolicy,
    ) -> Result<(), SessionError> {
        let url = self.provider.url();
        tracing::info!(session = %self.status.name(), url, "Connecting to stream");

        let connect = tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(url));
        let (ws_stream, _response) = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            result = connect => result.map_err(|_| SessionError::ConnectTimeout(self.connect_timeout))??,
        };
        let (mut write, mut read) = ws_stream.split();

        let heartbeat_state = Arc::new(HeartbeatState::default());
        let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel::<HeartbeatEvent>(10);
        let heartbeat_cancel = cancel.child_token();
        let _heartbeat_guard = heartbeat_cancel.clone().drop_guard();
        tokio::spawn(
            HeartbeatMonitor::new(
                self.status.name().to_string(),
                self.heartbeat.clone(),
                Arc::clone(&heartbeat_state),
                heartbeat_tx,
                heartbeat_cancel,
            )
            .run(),
        );
        let mut heartbeat_alive = true;

        for frame in self.provider.on_connected() {
            write.send(Message::Text(frame.into())).await?;
        }

        let mut authenticated = !self.provider.requires_auth();
        if authenticated {
            self.mark_connected(policy);
            self.send_subscriptions(&mut write, cancel).await?;
        }

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                event = heartbeat_rx.recv(), if heartbeat_alive => {
                    match event {
                        Some(HeartbeatEvent::SendPing) => {
                            heartbeat_state.mark_ping_sent();
                            write.send(Message::Ping(Vec::new().into())).await?;
                        }
                        Some(HeartbeatEvent::Timeout) => return Err(SessionError::HeartbeatTimeout),
                        None => heartbeat_alive = false,
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            heartbeat_state.record_pong();
                            self.handle_text(text.as_str(), &mut authenticated, &mut write, events, cancel, policy)
                                .await?;
                        }
                        Some(Ok(Message::Pong(_))) => heartbeat_state.record_pong(),
                        Some(Ok(Message::Ping(data))) => write.send(Message::Pong(data)).await?,
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(session = %self.status.name(), ?frame, "Server sent close frame");
                            return Err(SessionError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(SessionError::ConnectionClosed),
                    }
                }
            }
        }
    }

    async fn handle_text<W>(
        &self,
        text: &str,
        authenticated: &mut bool,
        write: &mut W,
        events: &mpsc::Sender<SessionEvent>,
        cancel: &CancellationToken,
        policy: &mut ReconnectPolicy,
    ) -> Result<(), SessionError>
    where
        W: Sink<Message, Error = tungstenite::Error> + Unpin,
    {
        let messages = match self.provider.parse_message(text) {
            Ok(messages) => messages,
            Err(e) => {
                tracing::debug!(session = %self.status.name(), error = %e, "Dropping unparseable frame");
                metrics::record_parse_error(self.provider.provider().source());
                self.status.increment_parse_errors();
                return Ok(());
            }
        };

        for message in messages {
            match message {
                InboundMessage::Data(raw) if *authenticated => {
                    forward_raw(raw, self.provider.provider(), &self.status, events).await?;
                }
                InboundMessage::Data(_) | InboundMessage::Control => {}
                InboundMessage::Authenticated => {
                    if !*authenticated {
                        *authenticated = true;
                        tracing::info!(session = %self.status.name(), "Stream authenticated");
                        self.mark_connected(policy);
                        self.send_subscriptions(write, cancel).await?;
                    }
                }
                InboundMessage::Error(reason) if !*authenticated => {
                    return Err(SessionError::Authentication(reason));
                }
                InboundMessage::Error(reason) => {
                    tracing::warn!(session = %self.status.name(), reason = %reason, "Upstream error frame");
                }
            }
        }
        Ok(())
    }

    async fn send_subscriptions<W>(&self, write: &mut W, cancel: &CancellationToken) -> Result<(), SessionError>
    where
        W: Sink<Message, Error = tungstenite::Error> + Unpin,
    {
        let pacing = self.provider.subscribe_pacing();
        let frames = self.provider.subscribe_frames(&self.symbols);
        let batches = frames.len();

        for (i, frame) in frames.into_iter().enumerate() {
            if i > 0 && !pacing.is_zero() {
                tokio::select! {
                    () = cancel.cancelled() => return Ok(()),
                    () = tokio::time::sleep(pacing) => {}
                }
            }
            write.send(Message::Text(frame.into())).await?;
        }

        tracing::info!(
            session = %self.status.name(),
            streams = self.symbols.len(),
            batches,
            "Subscribed"
        );
        Ok(())
    }

    fn mark_connected(&self, policy: &mut ReconnectPolicy) {
        policy.reset();
        self.status.set_state(SessionState::Connected);
        tracing::info!(session = %self.status.name(), "Stream connected");
    }
}

#[async_trait]
impl<P: StreamProvider> Session for StreamSession<P> {
    fn name(&self) -> &str {
        self.status.name()
    }

    fn kind(&self) -> SessionKind {
        SessionKind::Stream
    }

    fn status(&self) -> Arc<SessionStatus> {
        Arc::clone(&self.status)
    }

    async fn run(
        &self,
        events: mpsc::Sender<SessionEvent>,
        cancel: CancellationToken,
    ) -> Result<(), SessionError> {
        let result = self.run_loop(&events, &cancel).await;
        finish(&self.status, &events, result).await
    }
}
