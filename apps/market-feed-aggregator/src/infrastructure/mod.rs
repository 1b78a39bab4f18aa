//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the upstream sessions, the runtime that owns them,
//! and the HTTP surfaces in front of the application services.

/// Upstream session runtime: reconnect, heartbeat, stream and poll loops.
pub mod session;

/// Provider-specific session hooks and symbol discovery.
pub mod providers;

/// Session lifecycle and record relay.
pub mod orchestrator;

/// Per-symbol fan-out to push subscribers.
pub mod broadcast;

/// Cache store adapters and the best-effort write path.
pub mod cache;

/// Configuration from the environment.
pub mod config;

/// Push socket and charting routes.
pub mod server;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Tracing subscriber and OpenTelemetry export.
pub mod telemetry;
