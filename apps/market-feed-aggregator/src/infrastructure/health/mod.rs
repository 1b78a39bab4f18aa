//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, session status reporting, and Prometheus metrics.
//! Used by container orchestrators, load balancers, and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness check (simple OK)
//! - `GET /readyz` - Kubernetes readiness check (at least one session connected)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::domain::trendline::TrendlineStats;
use crate::infrastructure::broadcast::SharedBroadcaster;
use crate::infrastructure::metrics::get_metrics_handle;
use crate::infrastructure::orchestrator::{
    OrchestratorHealth, PollCounts, SessionOrchestrator, StreamCounts,
};
use crate::infrastructure::session::SessionSnapshot;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Orchestrator uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Whether sessions are running.
    pub initialized: bool,
    /// Stream session counts.
    pub stream_sessions: StreamCounts,
    /// Poll session counts.
    pub poll_sessions: PollCounts,
    /// Trendline store counts.
    pub trendlines: TrendlineStats,
    /// Connected push subscribers.
    pub clients: usize,
    /// Per-session state.
    pub sessions: Vec<SessionSnapshot>,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every session connected.
    Healthy,
    /// Some sessions connected.
    Degraded,
    /// No session connected.
    Unhealthy,
}

impl HealthStatus {
    /// Classify by connected and total session counts.
    #[must_use]
    pub const fn from_counts(connected: usize, total: usize) -> Self {
        if connected == 0 {
            Self::Unhealthy
        } else if connected >= total {
            Self::Healthy
        } else {
            Self::Degraded
        }
    }
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    orchestrator: Arc<SessionOrchestrator>,
    broadcaster: SharedBroadcaster,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub const fn new(
        version: String,
        orchestrator: Arc<SessionOrchestrator>,
        broadcaster: SharedBroadcaster,
    ) -> Self {
        Self {
            version,
            orchestrator,
            broadcaster,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Health routes over `state`.
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.orchestrator.health().connected_sessions() > 0 {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    from_parts(
        state.orchestrator.health(),
        state.broadcaster.get_client_count(),
        state.version.clone(),
    )
}

fn from_parts(health: OrchestratorHealth, clients: usize, version: String) -> HealthResponse {
    HealthResponse {
        status: HealthStatus::from_counts(health.connected_sessions(), health.total_sessions()),
        version,
        uptime_secs: health.uptime_secs,
        current_time: Utc::now(),
        initialized: health.initialized,
        stream_sessions: health.stream_sessions,
        poll_sessions: health.poll_sessions,
        trendlines: health.trendlines,
        clients,
        sessions: health.sessions,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::ProcessingPipeline;
    use crate::infrastructure::broadcast::SubscriptionBroadcaster;
    use crate::infrastructure::config::OrchestratorSettings;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use test_case::test_case;
    use tower::ServiceExt;

    fn state() -> Arc<HealthServerState> {
        Arc::new(HealthServerState::new(
            "test".to_string(),
            Arc::new(SessionOrchestrator::new(OrchestratorSettings::default(), None)),
            Arc::new(SubscriptionBroadcaster::new(
                Arc::new(ProcessingPipeline::default()),
                8,
            )),
        ))
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test_case(5, 5, HealthStatus::Healthy ; "all connected")]
    #[test_case(2, 5, HealthStatus::Degraded ; "partial")]
    #[test_case(0, 5, HealthStatus::Unhealthy ; "none connected")]
    #[test_case(0, 0, HealthStatus::Unhealthy ; "no sessions")]
    fn classify(connected: usize, total: usize, expected: HealthStatus) {
        assert_eq!(HealthStatus::from_counts(connected, total), expected);
    }

    #[tokio::test]
    async fn idle_service_is_unhealthy_but_live() {
        let app = router(state());

        let health = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(health.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body: serde_json::Value =
            serde_json::from_slice(&to_bytes(health.into_body(), usize::MAX).await.unwrap())
                .unwrap();
        assert_eq!(body["status"], "unhealthy");
        assert_eq!(body["initialized"], false);
        assert_eq!(body["clients"], 0);
        assert_eq!(body["trendlines"]["total_points"], 0);

        let live = app
            .clone()
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(live.status(), StatusCode::OK);

        let ready = app
            .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(ready.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
