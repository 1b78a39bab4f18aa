#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::cast_precision_loss,
        clippy::items_after_statements
    )
)]

//! Market Feed Aggregator - Multi-Provider Market Data Ingestion
//!
//! Keeps streaming and polling sessions open against several market data
//! providers, normalizes what they send into one canonical candle shape,
//! folds 1-minute candles into higher timeframes, computes indicators, and
//! pushes the enriched result to subscribers by symbol.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Canonical records and pure algorithms
//!   - `record`: `CanonicalRecord`, `Resolution`, `SymbolKey`
//!   - `normalize`: raw provider payloads to canonical records
//!   - `aggregation`: count-based tumbling windows
//!   - `indicators`: rolling history and technical indicators
//!   - `subscription`: subscriber interest by symbol
//!   - `trendline`: probability points from event providers
//!
//! - **Application**: Ports and services
//!   - `ports`: `CacheStore`
//!   - `services`: processing pipeline, charting history
//!
//! - **Infrastructure**: Adapters and runtime
//!   - `session`: reconnecting stream and poll loops
//!   - `providers`: per-provider hooks and symbol discovery
//!   - `orchestrator`: session lifecycle and record relay
//!   - `broadcast`: per-symbol fan-out
//!   - `cache`: in-memory TTL store and write queue
//!   - `server`: push socket and charting routes
//!   - `health`, `metrics`, `telemetry`, `config`
//!
//! # Data Flow
//!
//! ```text
//! Binance WS ─┐
//! Bybit WS   ─┤                                  ┌─► latest / trendlines
//! Blofin WS  ─┼─► sessions ─► orchestrator relay ─┼─► cache writer
//! Alpaca WS  ─┤                                  └─► broadcaster ─► pipeline
//! HTTP polls ─┘                                                     │
//!                                                  subscribers ◄────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Canonical records and pure algorithms with no I/O.
pub mod domain;

/// Application layer - Ports and processing services.
pub mod application;

/// Infrastructure layer - Sessions, servers and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::normalize::{NormalizationError, Provider, RawRecord, normalize, parse_key};
pub use domain::record::{CanonicalRecord, Resolution, SymbolKey};
pub use domain::subscription::{SubscriberId, SubscriptionManager};

// Application services
pub use application::ports::{CacheError, CacheStore};
pub use application::services::{
    EnrichedRecord, HistoryRange, HistoryResponse, ProcessingPipeline,
};

// Infrastructure config
pub use infrastructure::config::{AggregatorConfig, ConfigError, Credentials};

// Runtime
pub use infrastructure::broadcast::{
    BroadcastOutcome, ClientMessage, ServerMessage, SharedBroadcaster, SubscriptionBroadcaster,
};
pub use infrastructure::cache::{CacheWriter, MemoryCache};
pub use infrastructure::orchestrator::{OrchestratorHealth, SessionOrchestrator, ShutdownReport};
pub use infrastructure::providers::{SessionSet, build_sessions};
pub use infrastructure::server::{AppState, HttpServer, HttpServerError};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
