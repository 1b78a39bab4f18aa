//! Prometheus Metrics Module
//!
//! Exposes ingestion and fan-out metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Ingestion**: records received, parse and normalization errors per provider
//! - **Sessions**: reconnect attempts per session, connected session gauge
//! - **Delivery**: records delivered, delivery failures, subscriber gauge
//! - **Pipeline**: aggregated candles per resolution, processing latency
//! - **Cache**: write failures and queue drops
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if another global recorder is already installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "feed_records_received_total",
        "Canonical records produced per provider"
    );
    describe_counter!(
        "feed_parse_errors_total",
        "Inbound frames or poll responses that could not be parsed"
    );
    describe_counter!(
        "feed_normalization_errors_total",
        "Raw records dropped for a missing or invalid symbol"
    );
    describe_counter!(
        "feed_inconsistent_records_total",
        "Records violating low <= open,close <= high or volume >= 0"
    );

    describe_counter!(
        "feed_reconnects_total",
        "Session reconnection attempts"
    );
    describe_gauge!(
        "feed_sessions_connected",
        "Sessions currently connected, by kind"
    );

    describe_counter!(
        "feed_records_delivered_total",
        "Enriched records queued to subscribers"
    );
    describe_counter!(
        "feed_delivery_failures_total",
        "Deliveries dropped because a subscriber queue was full or closed"
    );
    describe_gauge!("feed_subscribers", "Connected push subscribers");

    describe_counter!(
        "feed_aggregated_candles_total",
        "Higher-timeframe candles folded, by resolution"
    );
    describe_histogram!(
        "feed_pipeline_processing_seconds",
        "Time to enrich one record"
    );

    describe_counter!(
        "feed_cache_write_failures_total",
        "Cache writes rejected by the store"
    );
    describe_counter!(
        "feed_cache_writes_dropped_total",
        "Cache writes dropped because the write queue was full"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Session kind label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKindLabel {
    /// Push (WebSocket) session.
    Stream,
    /// Timer-driven HTTP session.
    Poll,
}

impl SessionKindLabel {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Stream => "stream",
            Self::Poll => "poll",
        }
    }
}

/// Record a canonical record produced by a provider.
pub fn record_received(source: &str) {
    counter!("feed_records_received_total", "source" => source.to_string()).increment(1);
}

/// Record an unparseable frame or response.
pub fn record_parse_error(source: &str) {
    counter!("feed_parse_errors_total", "source" => source.to_string()).increment(1);
}

/// Record a raw record dropped by the normalizer.
pub fn record_normalization_error(source: &str) {
    counter!("feed_normalization_errors_total", "source" => source.to_string()).increment(1);
}

/// Record a record that breaks the OHLC invariant.
pub fn record_inconsistent(source: &str) {
    counter!("feed_inconsistent_records_total", "source" => source.to_string()).increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect(session: &str) {
    counter!("feed_reconnects_total", "session" => session.to_string()).increment(1);
}

/// Update the connected session gauge.
pub fn set_connected_sessions(kind: SessionKindLabel, count: usize) {
    #[allow(clippy::cast_precision_loss)]
    let value = count as f64;
    gauge!("feed_sessions_connected", "kind" => kind.as_str()).set(value);
}

/// Record records queued to subscribers.
pub fn record_delivered(count: u64) {
    counter!("feed_records_delivered_total").increment(count);
}

/// Record a failed delivery.
pub fn record_delivery_failure(reason: &'static str) {
    counter!("feed_delivery_failures_total", "reason" => reason).increment(1);
}

/// Update the subscriber gauge.
pub fn set_subscribers(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    let value = count as f64;
    gauge!("feed_subscribers").set(value);
}

/// Record a folded candle.
pub fn record_aggregated(resolution: &str) {
    counter!("feed_aggregated_candles_total", "resolution" => resolution.to_string()).increment(1);
}

/// Record pipeline processing duration.
pub fn record_processing_duration(duration: Duration) {
    histogram!("feed_pipeline_processing_seconds").record(duration.as_secs_f64());
}

/// Record a cache write rejected by the store.
pub fn record_cache_write_failure() {
    counter!("feed_cache_write_failures_total").increment(1);
}

/// Record a cache write dropped at the queue.
pub fn record_cache_write_dropped() {
    counter!("feed_cache_writes_dropped_total").increment(1);
}

// =============================================================================
// Tests
// =============================================================================
