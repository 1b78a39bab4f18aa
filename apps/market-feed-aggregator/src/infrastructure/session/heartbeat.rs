//! Heartbeat
//!
//! Keeps a stream session honest: asks the session loop to ping on a fixed
//! interval and reports a timeout when a ping goes unanswered for longer than
//! `pong_timeout`. The session loop owns the socket; this task only signals.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Ping cadence and pong deadline.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between pings.
    pub ping_interval: Duration,
    /// How long an outstanding ping may go unanswered.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(20),
            pong_timeout: Duration::from_secs(20),
        }
    }
}

/// Signals sent to the owning session loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Send a ping frame now.
    SendPing,
    /// The last ping was not answered in time.
    Timeout,
}

/// Liveness state shared between the heartbeat task and the session loop.
#[derive(Debug)]
pub struct HeartbeatState {
    last_pong: RwLock<Instant>,
    ping_outstanding: AtomicBool,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self {
            last_pong: RwLock::new(Instant::now()),
            ping_outstanding: AtomicBool::new(false),
        }
    }
}

impl HeartbeatState {
    /// Any inbound pong (or data) proves the link is alive.
    pub fn record_pong(&self) {
        *self.last_pong.write() = Instant::now();
        self.ping_outstanding.store(false, Ordering::SeqCst);
    }

    /// Called by the session loop after writing a ping.
    pub fn mark_ping_sent(&self) {
        if !self.ping_outstanding.swap(true, Ordering::SeqCst) {
            *self.last_pong.write() = Instant::now();
        }
    }

    /// Whether a ping is waiting for its pong.
    #[must_use]
    pub fn is_ping_outstanding(&self) -> bool {
        self.ping_outstanding.load(Ordering::SeqCst)
    }

    /// Time since the last pong (or since the outstanding ping was sent).
    #[must_use]
    pub fn silence(&self) -> Duration {
        self.last_pong.read().elapsed()
    }
}

/// Heartbeat task for one connection.
pub struct HeartbeatMonitor {
    session: String,
    config: HeartbeatConfig,
    state: Arc<HeartbeatState>,
    events: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatMonitor {
    /// Create a monitor for `session`.
    #[must_use]
    pub const fn new(
        session: String,
        config: HeartbeatConfig,
        state: Arc<HeartbeatState>,
        events: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session,
            config,
            state,
            events,
            cancel,
        }
    }

    /// Run until cancelled, a timeout is reported, or the session loop is gone.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.config.ping_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; the link was just established.
        interval.tick().await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = interval.tick() => {
                    let event = self.next_event();
                    if self.events.send(event).await.is_err() || event == HeartbeatEvent::Timeout {
                        break;
                    }
                }
            }
        }
        tracing::debug!(session = %self.session, "Heartbeat stopped");
    }

    fn next_event(&self) -> HeartbeatEvent {
        if self.state.is_ping_outstanding() {
            let silence = self.state.silence();
            if silence > self.config.pong_timeout {
                tracing::warn!(
                    session = %self.session,
                    silence_ms = u64::try_from(silence.as_millis()).unwrap_or(u64::MAX),
                    "Heartbeat timeout"
                );
                return HeartbeatEvent::Timeout;
            }
        }
        HeartbeatEvent::SendPing
    }
}
