//! Session Orchestrator
//!
//! Owns every stream and poll session for one run. Sessions are started with
//! a stagger, their events are relayed through one bounded channel, and the
//! normalized records come out of a second bounded channel that the
//! broadcaster drains.
//!
//! # Data Flow
//!
//! ```text
//! Session 1 ──┐
//! Session 2 ──┼─► events (bounded) ─► relay ─┬─► latest / trendlines
//! Session N ──┘                              ├─► cache writer (best-effort)
//!                                            └─► output (bounded) ─► broadcaster
//! ```
//!
//! A session that exhausts its backoff only affects its own symbols: the
//! relay logs the fatal event and keeps going.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::domain::record::{CanonicalRecord, SymbolKey};
use crate::domain::trendline::{TrendlineStats, TrendlineStore};
use crate::infrastructure::cache::CacheWriter;
use crate::infrastructure::config::OrchestratorSettings;
use crate::infrastructure::metrics::{self, SessionKindLabel};
use crate::infrastructure::providers::SessionSet;
use crate::infrastructure::session::{
    Session, SessionError, SessionEvent, SessionKind, SessionSnapshot, SessionStatus,
};

// =============================================================================
// Errors and Reports
// =============================================================================

/// Orchestrator lifecycle error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrchestratorError {
    /// `initialize` called while sessions are running.
    #[error("orchestrator is already initialized")]
    AlreadyInitialized,
}

/// Outcome of a shutdown. Individual failures are reported, not raised.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Sessions that stopped within the timeout.
    pub stopped: usize,
    /// One line per session that failed, panicked or timed out.
    pub errors: Vec<String>,
}

// =============================================================================
// Health Snapshot
// =============================================================================

/// Stream session counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamCounts {
    /// Stream sessions owned.
    pub total: usize,
    /// Stream sessions currently connected.
    pub connected: usize,
    /// Upstream streams carried by connected sessions.
    pub streams: usize,
}

/// Poll session counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollCounts {
    /// Poll sessions owned.
    pub total: usize,
    /// Poll sessions currently connected.
    pub connected: usize,
}

/// Aggregate orchestrator state.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorHealth {
    /// Whether sessions are running.
    pub initialized: bool,
    /// Seconds since the orchestrator was created.
    pub uptime_secs: u64,
    /// Stream session counts.
    pub stream_sessions: StreamCounts,
    /// Poll session counts.
    pub poll_sessions: PollCounts,
    /// Trendline store counts.
    pub trendlines: TrendlineStats,
    /// Symbols with a latest record.
    pub symbols: usize,
    /// Per-session state.
    pub sessions: Vec<SessionSnapshot>,
}

impl OrchestratorHealth {
    /// Sessions of either kind.
    #[must_use]
    pub const fn total_sessions(&self) -> usize {
        self.stream_sessions.total + self.poll_sessions.total
    }

    /// Connected sessions of either kind.
    #[must_use]
    pub const fn connected_sessions(&self) -> usize {
        self.stream_sessions.connected + self.poll_sessions.connected
    }
}

// =============================================================================
// Shared State
// =============================================================================

/// State the relay task mutates and readers snapshot.
struct Shared {
    latest: RwLock<HashMap<SymbolKey, CanonicalRecord>>,
    trendlines: RwLock<TrendlineStore>,
    statuses: RwLock<Vec<Arc<SessionStatus>>>,
    cache: Option<CacheWriter>,
    output: mpsc::Sender<CanonicalRecord>,
}

impl Shared {
    /// Record bookkeeping, then hand off downstream. Returns `false` once the
    /// downstream receiver is gone.
    async fn accept(&self, record: CanonicalRecord) -> bool {
        if record.is_point() {
            self.trendlines.write().add(&record);
        }
        self.latest.write().insert(record.key(), record.clone());
        if let Some(cache) = &self.cache {
            cache.write(&record);
        }
        self.output.send(record).await.is_ok()
    }

    fn health(&self, initialized: bool, uptime: Duration) -> OrchestratorHealth {
        let statuses = self.statuses.read();
        let mut stream_sessions = StreamCounts::default();
        let mut poll_sessions = PollCounts::default();

        for status in statuses.iter() {
            let connected = status.is_connected();
            match status.kind() {
                SessionKind::Stream => {
                    stream_sessions.total += 1;
                    if connected {
                        stream_sessions.connected += 1;
                        stream_sessions.streams += status.streams();
                    }
                }
                SessionKind::Poll => {
                    poll_sessions.total += 1;
                    poll_sessions.connected += usize::from(connected);
                }
            }
        }

        OrchestratorHealth {
            initialized,
            uptime_secs: uptime.as_secs(),
            stream_sessions,
            poll_sessions,
            trendlines: self.trendlines.read().stats(),
            symbols: self.latest.read().len(),
            sessions: statuses.iter().map(|s| s.snapshot()).collect(),
        }
    }
}

type SessionTasks = Arc<Mutex<Vec<(String, JoinHandle<Result<(), SessionError>>)>>>;

/// Handles of one initialized run.
struct Running {
    cancel: CancellationToken,
    starter: JoinHandle<()>,
    relay: JoinHandle<()>,
    status_log: JoinHandle<()>,
    tasks: SessionTasks,
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Owner of all upstream sessions.
pub struct SessionOrchestrator {
    settings: OrchestratorSettings,
    shared: Arc<Shared>,
    receiver: Mutex<Option<mpsc::Receiver<CanonicalRecord>>>,
    running: Mutex<Option<Running>>,
    started_at: Instant,
}

impl SessionOrchestrator {
    /// Create an idle orchestrator. `cache` receives every record best-effort.
    #[must_use]
    pub fn new(settings: OrchestratorSettings, cache: Option<CacheWriter>) -> Self {
        let (output, receiver) = mpsc::channel(settings.event_channel_capacity.max(1));
        Self {
            settings,
            shared: Arc::new(Shared {
                latest: RwLock::new(HashMap::new()),
                trendlines: RwLock::new(TrendlineStore::default()),
                statuses: RwLock::new(Vec::new()),
                cache,
                output,
            }),
            receiver: Mutex::new(Some(receiver)),
            running: Mutex::new(None),
            started_at: Instant::now(),
        }
    }

    /// Take the record stream. Only the first call gets it.
    pub fn take_receiver(&self) -> Option<mpsc::Receiver<CanonicalRecord>> {
        self.receiver.lock().take()
    }

    /// Whether sessions are running.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Start `sessions`: streams first, one per stagger interval, then the
    /// poll sessions after the poll start delay.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::AlreadyInitialized`] if already running.
    pub fn initialize(&self, sessions: SessionSet) -> Result<(), OrchestratorError> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(OrchestratorError::AlreadyInitialized);
        }

        let all: Vec<Arc<dyn Session>> = sessions
            .streams
            .iter()
            .chain(sessions.polls.iter())
            .cloned()
            .collect();
        *self.shared.statuses.write() = all.iter().map(|s| s.status()).collect();

        let cancel = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::channel(self.settings.event_channel_capacity.max(1));
        let tasks: SessionTasks = Arc::default();

        let relay = tokio::spawn(relay_events(events_rx, Arc::clone(&self.shared)));
        let starter = tokio::spawn(start_sessions(
            sessions,
            self.settings.clone(),
            events_tx,
            cancel.clone(),
            Arc::clone(&tasks),
        ));
        let status_log = tokio::spawn(log_status(
            Arc::clone(&self.shared),
            self.settings.status_log_interval,
            cancel.clone(),
            self.started_at,
        ));

        tracing::info!(sessions = all.len(), "Orchestrator initialized");
        *running = Some(Running {
            cancel,
            starter,
            relay,
            status_log,
            tasks,
        });
        Ok(())
    }

    /// Stop every session, waiting at most the shutdown timeout, then clear
    /// all in-memory state. The orchestrator can be initialized again.
    pub async fn shutdown(&self) -> ShutdownReport {
        let Some(running) = self.running.lock().take() else {
            return ShutdownReport::default();
        };

        tracing::info!("Orchestrator shutting down");
        running.cancel.cancel();
        let deadline = tokio::time::Instant::now() + self.settings.shutdown_timeout;
        let mut report = ShutdownReport::default();

        if let Err(e) = running.starter.await {
            report.errors.push(format!("starter: {e}"));
        }

        let tasks = std::mem::take(&mut *running.tasks.lock());
        for (name, mut handle) in tasks {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(Ok(()))) => report.stopped += 1,
                Ok(Ok(Err(e))) => {
                    report.stopped += 1;
                    report.errors.push(format!("{name}: {e}"));
                }
                Ok(Err(e)) => report.errors.push(format!("{name}: {e}")),
                Err(_) => {
                    handle.abort();
                    report.errors.push(format!("{name}: did not stop in time"));
                }
            }
        }

        // Every event sender is gone now, so the relay drains and exits.
        let mut relay = running.relay;
        if tokio::time::timeout_at(deadline, &mut relay).await.is_err() {
            relay.abort();
            report.errors.push("relay: did not stop in time".to_string());
        }
        let _ = running.status_log.await;

        self.shared.latest.write().clear();
        self.shared.trendlines.write().clear();
        self.shared.statuses.write().clear();
        metrics::set_connected_sessions(SessionKindLabel::Stream, 0);
        metrics::set_connected_sessions(SessionKindLabel::Poll, 0);

        for error in &report.errors {
            tracing::warn!(error = %error, "Session stop error");
        }
        tracing::info!(
            stopped = report.stopped,
            errors = report.errors.len(),
            "Orchestrator stopped"
        );
        report
    }

    /// Aggregate health.
    #[must_use]
    pub fn health(&self) -> OrchestratorHealth {
        let health = self
            .shared
            .health(self.is_initialized(), self.started_at.elapsed());
        metrics::set_connected_sessions(SessionKindLabel::Stream, health.stream_sessions.connected);
        metrics::set_connected_sessions(SessionKindLabel::Poll, health.poll_sessions.connected);
        health
    }

    /// Latest record for a symbol.
    #[must_use]
    pub fn latest(&self, key: &SymbolKey) -> Option<CanonicalRecord> {
        self.shared.latest.read().get(key).cloned()
    }

    /// Every symbol with a latest record, sorted.
    #[must_use]
    pub fn symbols(&self) -> Vec<SymbolKey> {
        let mut symbols: Vec<SymbolKey> = self.shared.latest.read().keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Last `limit` probability points for a symbol, most recent last.
    #[must_use]
    pub fn trendline(&self, key: &SymbolKey, limit: usize) -> Vec<CanonicalRecord> {
        self.shared.trendlines.read().points(key, limit)
    }
}

impl std::fmt::Debug for SessionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOrchestrator")
            .field("initialized", &self.is_initialized())
            .field("sessions", &self.shared.statuses.read().len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Background Tasks
// =============================================================================

/// Sleep unless cancelled first. Returns `false` on cancellation.
async fn pause(delay: Duration, cancel: &CancellationToken) -> bool {
    if delay.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}

fn spawn_session(
    session: Arc<dyn Session>,
    events: &mpsc::Sender<SessionEvent>,
    cancel: &CancellationToken,
    tasks: &SessionTasks,
) {
    let name = session.name().to_string();
    tracing::info!(session = %name, kind = session.kind().as_str(), "Starting session");
    let events = events.clone();
    let cancel = cancel.child_token();
    let handle = tokio::spawn(async move { session.run(events, cancel).await });
    tasks.lock().push((name, handle));
}

async fn start_sessions(
    sessions: SessionSet,
    settings: OrchestratorSettings,
    events: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
    tasks: SessionTasks,
) {
    for (i, session) in sessions.streams.into_iter().enumerate() {
        if i > 0 && !pause(settings.stream_stagger, &cancel).await {
            return;
        }
        spawn_session(session, &events, &cancel, &tasks);
    }

    if sessions.polls.is_empty() || !pause(settings.poll_start_delay, &cancel).await {
        return;
    }

    for (i, session) in sessions.polls.into_iter().enumerate() {
        if i > 0 && !pause(settings.poll_stagger, &cancel).await {
            return;
        }
        spawn_session(session, &events, &cancel, &tasks);
    }
    tracing::debug!("All sessions started");
}

async fn relay_events(mut events: mpsc::Receiver<SessionEvent>, shared: Arc<Shared>) {
    let mut downstream_open = true;
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Record(record) => {
                if downstream_open && !shared.accept(record).await {
                    tracing::warn!("Record receiver dropped, records are no longer forwarded");
                    downstream_open = false;
                }
            }
            SessionEvent::Fatal { session, reason } => {
                tracing::error!(
                    session = %session,
                    reason = %reason,
                    "Session stopped permanently, other sessions continue"
                );
            }
        }
    }
    tracing::debug!("Event relay stopped");
}

async fn log_status(
    shared: Arc<Shared>,
    interval: Duration,
    cancel: CancellationToken,
    started_at: Instant,
) {
    if interval.is_zero() {
        return;
    }
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {
                let health = shared.health(true, started_at.elapsed());
                metrics::set_connected_sessions(SessionKindLabel::Stream, health.stream_sessions.connected);
                metrics::set_connected_sessions(SessionKindLabel::Poll, health.poll_sessions.connected);
                tracing::info!(
                    streams_connected = health.stream_sessions.connected,
                    streams_total = health.stream_sessions.total,
                    upstream_streams = health.stream_sessions.streams,
                    polls_connected = health.poll_sessions.connected,
                    polls_total = health.poll_sessions.total,
                    trendline_symbols = health.trendlines.total_symbols,
                    trendline_points = health.trendlines.total_points,
                    symbols = health.symbols,
                    "Session status"
                );
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::record::Resolution;
    use crate::infrastructure::session::SessionState;
    use async_trait::async_trait;
    use serde_json::Value;

    /// Emits its records, then either idles until cancelled or fails.
    struct FakeSession {
        status: Arc<SessionStatus>,
        kind: SessionKind,
        records: Vec<CanonicalRecord>,
        fail: bool,
    }

    impl FakeSession {
        fn new(name: &str, kind: SessionKind, records: Vec<CanonicalRecord>, fail: bool) -> Arc<dyn Session> {
            Arc::new(Self {
                status: Arc::new(SessionStatus::new(name, kind)),
                kind,
                records,
                fail,
            })
        }
    }

    #[async_trait]
    impl Session for FakeSession {
        fn name(&self) -> &str {
            self.status.name()
        }

        fn kind(&self) -> SessionKind {
            self.kind
        }

        fn status(&self) -> Arc<SessionStatus> {
            Arc::clone(&self.status)
        }

        async fn run(
            &self,
            events: mpsc::Sender<SessionEvent>,
            cancel: CancellationToken,
        ) -> Result<(), SessionError> {
            self.status.set_state(SessionState::Connected);
            for record in &self.records {
                events
                    .send(SessionEvent::Record(record.clone()))
                    .await
                    .map_err(|_| SessionError::ChannelClosed)?;
            }
            if self.fail {
                self.status.set_state(SessionState::Stopped);
                let _ = events
                    .send(SessionEvent::Fatal {
                        session: self.name().to_string(),
                        reason: "max reconnect attempts exceeded".to_string(),
                    })
                    .await;
                return Err(SessionError::MaxReconnectAttemptsExceeded);
            }
            cancel.cancelled().await;
            self.status.set_state(SessionState::Stopped);
            Ok(())
        }
    }

    fn settings() -> OrchestratorSettings {
        OrchestratorSettings {
            stream_stagger: Duration::ZERO,
            poll_start_delay: Duration::ZERO,
            poll_stagger: Duration::ZERO,
            event_channel_capacity: 64,
            shutdown_timeout: Duration::from_secs(2),
            status_log_interval: Duration::ZERO,
        }
    }

    fn candle(symbol: &str, ts: i64) -> CanonicalRecord {
        CanonicalRecord {
            symbol: symbol.to_string(),
            exchange: "binance".to_string(),
            timestamp: ts,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 1.0,
            resolution: Resolution::OneMinute,
            source: "binance_futures".to_string(),
            aggregated_from: None,
            raw: Value::Null,
        }
    }

    fn point(symbol: &str, ts: i64) -> CanonicalRecord {
        CanonicalRecord::point("polymarket", symbol.to_string(), ts, 0.4, 0.0, "polymarket".to_string(), Value::Null)
    }

    #[tokio::test]
    async fn relays_records_and_tracks_latest() {
        let orchestrator = SessionOrchestrator::new(settings(), None);
        let mut rx = orchestrator.take_receiver().unwrap();
        assert!(orchestrator.take_receiver().is_none());

        orchestrator
            .initialize(SessionSet {
                streams: vec![FakeSession::new(
                    "binance_futures",
                    SessionKind::Stream,
                    vec![candle("BTCUSDT", 1), candle("BTCUSDT", 2)],
                    false,
                )],
                polls: vec![FakeSession::new("polymarket", SessionKind::Poll, vec![point("POLY:m:c", 3)], false)],
            })
            .unwrap();

        let mut received = Vec::new();
        for _ in 0..3 {
            received.push(rx.recv().await.unwrap());
        }
        assert_eq!(received.len(), 3);

        let btc = received[0].key();
        assert_eq!(orchestrator.latest(&btc).unwrap().timestamp, 2);

        let health = orchestrator.health();
        assert!(health.initialized);
        assert_eq!(health.stream_sessions.total, 1);
        assert_eq!(health.poll_sessions.total, 1);
        assert_eq!(health.trendlines.total_points, 1);
        assert_eq!(health.symbols, 2);

        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn fatal_session_does_not_stop_others() {
        let orchestrator = SessionOrchestrator::new(settings(), None);
        let mut rx = orchestrator.take_receiver().unwrap();

        orchestrator
            .initialize(SessionSet {
                streams: vec![
                    FakeSession::new("bybit_linear", SessionKind::Stream, vec![], true),
                    FakeSession::new("binance_futures", SessionKind::Stream, vec![candle("ETHUSDT", 1)], false),
                ],
                polls: vec![],
            })
            .unwrap();

        let record = rx.recv().await.unwrap();
        assert_eq!(record.symbol, "ETHUSDT");

        let report = orchestrator.shutdown().await;
        assert_eq!(report.stopped, 2);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("bybit_linear"));
    }

    #[tokio::test]
    async fn shutdown_clears_and_allows_reinit() {
        let orchestrator = SessionOrchestrator::new(settings(), None);
        let mut rx = orchestrator.take_receiver().unwrap();

        let set = || SessionSet {
            streams: vec![FakeSession::new("blofin", SessionKind::Stream, vec![candle("SOLUSDT", 1)], false)],
            polls: vec![],
        };

        orchestrator.initialize(set()).unwrap();
        assert_eq!(orchestrator.initialize(set()), Err(OrchestratorError::AlreadyInitialized));
        rx.recv().await.unwrap();

        let report = orchestrator.shutdown().await;
        assert!(report.errors.is_empty());
        assert!(!orchestrator.is_initialized());
        assert!(orchestrator.symbols().is_empty());
        assert_eq!(orchestrator.health().total_sessions(), 0);

        orchestrator.initialize(set()).unwrap();
        assert_eq!(rx.recv().await.unwrap().symbol, "SOLUSDT");
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_when_idle_is_a_no_op() {
        let orchestrator = SessionOrchestrator::new(settings(), None);
        assert_eq!(orchestrator.shutdown().await, ShutdownReport::default());
    }
}
