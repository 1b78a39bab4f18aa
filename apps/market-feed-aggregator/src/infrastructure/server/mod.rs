//! Public HTTP Server
//!
//! One axum router on `PORT` carrying the push transport and the charting
//! queries.
//!
//! # Endpoints
//!
//! - `GET /ws` - WebSocket upgrade for live `ohlcv_update` pushes
//! - `GET /udf/history` - Parallel-array history for charting clients
//! - `GET /udf/time` - Server time in seconds
//! - `GET /udf/symbols` - Symbol description
//! - `GET /udf/config` - Supported resolutions and capability flags

mod udf;
mod ws;

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, routing::get};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::domain::record::SymbolKey;
use crate::infrastructure::broadcast::SharedBroadcaster;
use crate::infrastructure::orchestrator::SessionOrchestrator;

// =============================================================================
// Server State
// =============================================================================

/// Shared state behind every route.
#[derive(Debug, Clone)]
pub struct AppState {
    broadcaster: SharedBroadcaster,
    orchestrator: Arc<SessionOrchestrator>,
}

impl AppState {
    /// Create route state.
    #[must_use]
    pub const fn new(broadcaster: SharedBroadcaster, orchestrator: Arc<SessionOrchestrator>) -> Self {
        Self {
            broadcaster,
            orchestrator,
        }
    }

    /// Every symbol with candle history or a latest record.
    #[must_use]
    pub fn all_symbols(&self) -> BTreeSet<SymbolKey> {
        let mut symbols = self.broadcaster.pipeline().symbols();
        symbols.extend(self.orchestrator.symbols());
        symbols
    }
}

/// Public routes over `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::upgrade_handler))
        .route("/udf/history", get(udf::history_handler))
        .route("/udf/time", get(udf::time_handler))
        .route("/udf/symbols", get(udf::symbols_handler))
        .route("/udf/config", get(udf::config_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Server
// =============================================================================

/// Push and query HTTP server.
pub struct HttpServer {
    port: u16,
    state: AppState,
    cancel: CancellationToken,
}

impl HttpServer {
    /// Create a new server.
    #[must_use]
    pub const fn new(port: u16, state: AppState, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError` if binding fails or the server stops with
    /// an error.
    pub async fn run(self) -> Result<(), HttpServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HttpServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "HTTP server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HttpServerError::ServerFailed(e.to_string()))?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

// =============================================================================
// Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}
