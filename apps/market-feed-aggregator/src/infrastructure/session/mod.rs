//! Session Framework
//!
//! One generic engine per transport, parameterized by provider behavior:
//!
//! - [`StreamSession`]: WebSocket push sessions driven by inbound frames
//! - [`PollSession`]: HTTP sessions driven by a timer
//!
//! Both share the same lifecycle ([`SessionState`]), the same backoff
//! ([`reconnect::ReconnectPolicy`]) and the same output path: raw records are
//! normalized here and forwarded to the orchestrator as [`SessionEvent`]s over
//! a bounded channel.

pub mod error;
pub mod heartbeat;
pub mod poll;
pub mod reconnect;
pub mod state;
pub mod stream;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::normalize::{Provider, RawRecord, normalize};
use crate::domain::record::CanonicalRecord;
use crate::infrastructure::metrics;

pub use error::{ParseError, SessionError};
pub use poll::{PollProvider, PollSession};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use state::{SessionKind, SessionSnapshot, SessionState, SessionStatus};
pub use stream::{InboundMessage, StreamProvider, StreamSession};

// =============================================================================
// Session Contract
// =============================================================================

/// Output of a session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A normalized record.
    Record(CanonicalRecord),
    /// The session gave up. Other sessions keep running.
    Fatal {
        /// Session name.
        session: String,
        /// Why it stopped.
        reason: String,
    },
}

/// A supervised upstream session.
#[async_trait]
pub trait Session: Send + Sync {
    /// Unique session name (e.g. `binance_futures_0`).
    fn name(&self) -> &str;

    /// Push or poll.
    fn kind(&self) -> SessionKind;

    /// Shared status handle.
    fn status(&self) -> Arc<SessionStatus>;

    /// Run until cancelled or until backoff is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MaxReconnectAttemptsExceeded`] when the attempt
    /// cap is reached and [`SessionError::ChannelClosed`] when the event
    /// receiver is gone. Every other failure is retried internally.
    async fn run(
        &self,
        events: mpsc::Sender<SessionEvent>,
        cancel: CancellationToken,
    ) -> Result<(), SessionError>;
}

// =============================================================================
// Shared Engine Helpers
// =============================================================================

/// Normalize one raw record and hand it to the orchestrator.
///
/// Normalization failures are counted and dropped. Only a closed event
/// channel is an error.
pub(crate) async fn forward_raw(
    raw: RawRecord,
    provider: Provider,
    status: &SessionStatus,
    events: &mpsc::Sender<SessionEvent>,
) -> Result<(), SessionError> {
    let record = match normalize(raw, provider) {
        Ok(record) => record,
        Err(e) => {
            tracing::debug!(session = %status.name(), error = %e, "Dropping record");
            metrics::record_normalization_error(provider.source());
            return Ok(());
        }
    };

    if !record.is_consistent() {
        tracing::debug!(
            session = %status.name(),
            symbol = %record.symbol,
            open = record.open,
            high = record.high,
            low = record.low,
            close = record.close,
            "Record violates OHLC invariant"
        );
        metrics::record_inconsistent(&record.source);
    }

    metrics::record_received(&record.source);
    status.increment_records();
    events
        .send(SessionEvent::Record(record))
        .await
        .map_err(|_| SessionError::ChannelClosed)
}

/// What to do after a backoff wait.
pub(crate) enum Retry {
    /// Try to connect again.
    Again,
    /// Shutdown was requested while waiting.
    Cancelled,
}

/// Wait out the next backoff delay.
///
/// Returns [`SessionError::MaxReconnectAttemptsExceeded`] once the policy is
/// exhausted.
pub(crate) async fn backoff(
    policy: &mut ReconnectPolicy,
    status: &SessionStatus,
    cancel: &CancellationToken,
) -> Result<Retry, SessionError> {
    let Some(delay) = policy.next_delay() else {
        return Err(SessionError::MaxReconnectAttemptsExceeded);
    };
    let attempt = policy.attempt_count();

    status.set_state(SessionState::Reconnecting);
    status.set_reconnect_attempts(attempt);
    metrics::record_reconnect(status.name());
    tracing::info!(
        session = %status.name(),
        attempt,
        max_attempts = policy.max_attempts(),
        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
        "Reconnecting"
    );

    tokio::select! {
        () = cancel.cancelled() => Ok(Retry::Cancelled),
        () = tokio::time::sleep(delay) => Ok(Retry::Again),
    }
}

/// Mark the session stopped and report terminal failures upstream.
pub(crate) async fn finish(
    status: &SessionStatus,
    events: &mpsc::Sender<SessionEvent>,
    result: Result<(), SessionError>,
) -> Result<(), SessionError> {
    status.set_state(SessionState::Stopped);

    match &result {
        Ok(()) => tracing::info!(session = %status.name(), "Session stopped"),
        Err(e) => {
            tracing::error!(session = %status.name(), error = %e, "Session failed permanently");
            status.set_error(e.to_string());
            if !matches!(e, SessionError::ChannelClosed) {
                let _ = events
                    .send(SessionEvent::Fatal {
                        session: status.name().to_string(),
                        reason: e.to_string(),
                    })
                    .await;
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn raw(symbol: serde_json::Value) -> RawRecord {
        RawRecord {
            symbol: Some(symbol),
            open: Some(json!(1.0)),
            high: Some(json!(2.0)),
            low: Some(json!(0.5)),
            close: Some(json!(1.5)),
            volume: Some(json!(3.0)),
            ..RawRecord::default()
        }
    }

    #[tokio::test]
    async fn forwards_normalized_record() {
        let status = SessionStatus::new("s", SessionKind::Stream);
        let (tx, mut rx) = mpsc::channel(4);

        forward_raw(raw(json!("btcusdt")), Provider::Binance, &status, &tx)
            .await
            .unwrap();

        let Some(SessionEvent::Record(record)) = rx.recv().await else {
            panic!("expected record");
        };
        assert_eq!(record.key().to_string(), "binance:BTCUSDT");
        assert_eq!(status.records_received(), 1);
    }

    #[tokio::test]
    async fn drops_record_without_symbol() {
        let status = SessionStatus::new("s", SessionKind::Stream);
        let (tx, mut rx) = mpsc::channel(4);

        let mut bad = raw(json!("x"));
        bad.symbol = None;
        forward_raw(bad, Provider::Bybit, &status, &tx).await.unwrap();

        assert!(rx.try_recv().is_err());
        assert_eq!(status.records_received(), 0);
    }

    #[tokio::test]
    async fn closed_channel_is_reported() {
        let status = SessionStatus::new("s", SessionKind::Poll);
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let result = forward_raw(raw(json!("BTCUSDT")), Provider::Binance, &status, &tx).await;
        assert!(matches!(result, Err(SessionError::ChannelClosed)));
    }

    #[tokio::test]
    async fn backoff_exhaustion() {
        let status = SessionStatus::new("s", SessionKind::Stream);
        let cancel = CancellationToken::new();
        let mut policy =
            ReconnectPolicy::new(ReconnectConfig::with_base(Duration::from_millis(1), 1));

        assert!(matches!(
            backoff(&mut policy, &status, &cancel).await,
            Ok(Retry::Again)
        ));
        assert_eq!(status.state(), SessionState::Reconnecting);
        assert!(matches!(
            backoff(&mut policy, &status, &cancel).await,
            Err(SessionError::MaxReconnectAttemptsExceeded)
        ));
    }

    #[tokio::test]
    async fn backoff_observes_cancel() {
        let status = SessionStatus::new("s", SessionKind::Stream);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut policy =
            ReconnectPolicy::new(ReconnectConfig::with_base(Duration::from_secs(60), 0));

        assert!(matches!(
            backoff(&mut policy, &status, &cancel).await,
            Ok(Retry::Cancelled)
        ));
    }

    #[tokio::test]
    async fn fatal_event_on_exhaustion() {
        let status = SessionStatus::new("bybit_linear_0", SessionKind::Stream);
        let (tx, mut rx) = mpsc::channel(1);

        let result = finish(&status, &tx, Err(SessionError::MaxReconnectAttemptsExceeded)).await;

        assert!(result.is_err());
        assert_eq!(status.state(), SessionState::Stopped);
        let Some(SessionEvent::Fatal { session, .. }) = rx.recv().await else {
            panic!("expected fatal event");
        };
        assert_eq!(session, "bybit_linear_0");
    }
}
