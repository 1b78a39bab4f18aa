//! Poll Session
//!
//! Generic timer-driven HTTP session. The provider turns one poll into raw
//! records; this engine owns the tick, the HTTP client and backoff.
//!
//! A successful poll enters `Connected`. A failed poll backs off exactly like
//! a dropped socket, then polls again immediately. HTTP 429 skips the tick
//! without counting as an attempt.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use super::state::{SessionKind, SessionState, SessionStatus};
use super::{Retry, Session, SessionError, SessionEvent, backoff, finish, forward_raw};
use crate::domain::normalize::{Provider, RawRecord};

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Provider Hooks
// =============================================================================

/// Provider-specific behavior for a poll session.
#[async_trait]
pub trait PollProvider: Send + Sync + 'static {
    /// Normalization rules for this provider.
    fn provider(&self) -> Provider;

    /// Time between polls.
    fn interval(&self) -> Duration;

    /// Run one poll. Items with an unexpected shape are skipped, not errors.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when the upstream cannot be reached or
    /// answers with a failure status.
    async fn poll(&self, client: &reqwest::Client) -> Result<Vec<RawRecord>, SessionError>;
}

/// GET `url` and decode a JSON body.
///
/// # Errors
///
/// - [`SessionError::RateLimited`] on HTTP 429
/// - [`SessionError::Upstream`] on any other non-success status
/// - [`SessionError::Http`] on transport or decode failure
pub async fn get_json(
    client: &reqwest::Client,
    url: &str,
    query: &[(&str, &str)],
) -> Result<Value, SessionError> {
    let response = client.get(url).query(query).send().await?;

    let status = response.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(SessionError::RateLimited);
    }
    if !status.is_success() {
        return Err(SessionError::Upstream {
            status: status.as_u16(),
        });
    }

    Ok(response.json().await?)
}

// =============================================================================
// Poll Session
// =============================================================================

/// HTTP poll session for one provider.
pub struct PollSession<P> {
    provider: P,
    reconnect: ReconnectConfig,
    request_timeout: Duration,
    status: Arc<SessionStatus>,
}

impl<P: PollProvider> PollSession<P> {
    /// Create a poll session.
    #[must_use]
    pub fn new(name: impl Into<String>, provider: P, reconnect: ReconnectConfig) -> Self {
        Self {
            provider,
            reconnect,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            status: Arc::new(SessionStatus::new(name, SessionKind::Poll)),
        }
    }

    /// Override the per-request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    async fn run_loop(
        &self,
        events: &mpsc::Sender<SessionEvent>,
        cancel: &CancellationToken,
    ) -> Result<(), SessionError> {
        let client = reqwest::Client::builder()
            .timeout(self.request_timeout)
            .build()?;
        let mut policy = ReconnectPolicy::new(self.reconnect.clone());
        let mut interval = tokio::time::interval(self.provider.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                _ = interval.tick() => {}
            }

            if !self.status.is_connected() {
                self.status.set_state(SessionState::Connecting);
            }

            match self.provider.poll(&client).await {
                Ok(records) => {
                    if !self.status.is_connected() {
                        policy.reset();
                        self.status.set_state(SessionState::Connected);
                        tracing::info!(session = %self.status.name(), "Poll session connected");
                    }
                    self.status.set_streams(records.len());
                    for raw in records {
                        forward_raw(raw, self.provider.provider(), &self.status, events).await?;
                    }
                }
                Err(SessionError::RateLimited) => {
                    tracing::warn!(session = %self.status.name(), "Rate limited, skipping tick");
                }
                Err(e) => {
                    tracing::warn!(session = %self.status.name(), error = %e, "Poll failed");
                    self.status.set_error(e.to_string());
                    match backoff(&mut policy, &self.status, cancel).await? {
                        Retry::Again => interval.reset_immediately(),
                        Retry::Cancelled => return Ok(()),
                    }
                }
            }
        }
    }
}

#[async_trait]
impl<P: PollProvider> Session for PollSession<P> {
    fn name(&self) -> &str {
        self.status.name()
    }

    fn kind(&self) -> SessionKind {
        SessionKind::Poll
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

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;

    struct ScriptedProvider {
        script: Mutex<VecDeque<Result<Vec<RawRecord>, SessionError>>>,
        interval: Duration,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<Vec<RawRecord>, SessionError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                interval: Duration::from_millis(5),
            }
        }
    }

    #[async_trait]
    impl PollProvider for ScriptedProvider {
        fn provider(&self) -> Provider {
            Provider::Polymarket
        }

        fn interval(&self) -> Duration {
            self.interval
        }

        async fn poll(&self, _client: &reqwest::Client) -> Result<Vec<RawRecord>, SessionError> {
            self.script
                .lock()
                .pop_front()
                .unwrap_or(Err(SessionError::ConnectionClosed))
        }
    }

    fn point(symbol: &str) -> RawRecord {
        RawRecord {
            symbol: Some(json!(symbol)),
            probability: Some(json!(0.4)),
            ..RawRecord::default()
        }
    }

    #[tokio::test]
    async fn rate_limit_does_not_count_as_attempt() {
        let provider = ScriptedProvider::new(vec![
            Err(SessionError::RateLimited),
            Err(SessionError::RateLimited),
            Err(SessionError::RateLimited),
            Ok(vec![point("POLY:m:1")]),
        ]);
        let session = PollSession::new(
            "polymarket",
            provider,
            ReconnectConfig::with_base(Duration::from_millis(1), 1),
        );
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { session.run(tx, cancel).await })
        };

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let SessionEvent::Record(record) = event else {
            panic!("expected record");
        };
        assert_eq!(record.key().to_string(), "polymarket:POLY:m:1");

        cancel.cancel();
        let _ = handle.await.unwrap();
    }

    #[tokio::test]
    async fn failures_exhaust_backoff_and_emit_fatal() {
        let provider = ScriptedProvider::new(vec![]);
        let session = PollSession::new(
            "oddsapi",
            provider,
            ReconnectConfig::with_base(Duration::from_millis(1), 2),
        );
        let status = session.status();
        let (tx, mut rx) = mpsc::channel(8);

        let result = session.run(tx, CancellationToken::new()).await;

        assert!(matches!(result, Err(SessionError::MaxReconnectAttemptsExceeded)));
        assert_eq!(status.state(), SessionState::Stopped);
        assert!(matches!(rx.recv().await, Some(SessionEvent::Fatal { .. })));
    }

    #[tokio::test]
    async fn success_resets_attempts() {
        let mut provider = ScriptedProvider::new(vec![
            Err(SessionError::Upstream { status: 502 }),
            Ok(vec![point("POLY:m:1")]),
        ]);
        provider.interval = Duration::from_secs(60);
        let session = PollSession::new(
            "polymarket",
            provider,
            ReconnectConfig::with_base(Duration::from_millis(1), 5),
        );
        let status = session.status();
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { session.run(tx, cancel).await })
        };

        let _ = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert_eq!(status.snapshot().reconnect_attempts, 0);

        cancel.cancel();
        let _ = handle.await.unwrap();
    }
}
