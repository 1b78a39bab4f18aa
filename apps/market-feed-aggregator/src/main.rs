//! Market Feed Aggregator Binary
//!
//! Starts the provider sessions, the push/charting server and the health
//! server.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-feed-aggregator
//! ```
//!
//! # Environment Variables
//!
//! - `PORT`: Push socket and UDF port (default: 8080)
//! - `HEALTH_PORT`: Health and metrics port (default: 8082)
//! - `ALPACA_API_KEY_1` / `ALPACA_SECRET_KEY_1`: First Alpaca account (optional)
//! - `ALPACA_API_KEY_2` / `ALPACA_SECRET_KEY_2`: Second Alpaca account (optional)
//! - `ODDS_API_KEY`: Enables the sports odds poller (optional)
//! - `SYMBOL_DISCOVERY_ENABLED`: Discover crypto symbols at startup (default: true)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log filter (default: market_feed_aggregator=info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use market_feed_aggregator::application::services::ProcessingPipeline;
use market_feed_aggregator::infrastructure::broadcast::SubscriptionBroadcaster;
use market_feed_aggregator::infrastructure::cache::{CacheWriter, MemoryCache};
use market_feed_aggregator::infrastructure::health::{HealthServer, HealthServerState};
use market_feed_aggregator::infrastructure::orchestrator::SessionOrchestrator;
use market_feed_aggregator::infrastructure::providers::build_sessions;
use market_feed_aggregator::infrastructure::server::{AppState, HttpServer};
use market_feed_aggregator::infrastructure::telemetry;
use market_feed_aggregator::{AggregatorConfig, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Timeout for upstream HTTP requests (polls and discovery).
const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    install_crypto_provider();

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Market Feed Aggregator");

    let _metrics_handle = init_metrics();

    let config = AggregatorConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Cache side channel
    let cache = MemoryCache::new();
    let sweeper = cache.spawn_sweeper(config.cache.sweep_interval, shutdown_token.clone());
    let (cache_writer, _cache_task) =
        CacheWriter::spawn(Arc::new(cache), config.cache.write_queue, config.cache.ttl);

    // Sessions and fan-out
    let orchestrator = Arc::new(SessionOrchestrator::new(
        config.orchestrator.clone(),
        Some(cache_writer),
    ));
    let records = orchestrator
        .take_receiver()
        .context("orchestrator record stream already taken")?;
    let broadcaster = Arc::new(SubscriptionBroadcaster::new(
        Arc::new(ProcessingPipeline::default()),
        config.subscriber_queue_capacity,
    ));
    let broadcast_task = tokio::spawn(
        Arc::clone(&broadcaster).run(records, shutdown_token.clone()),
    );

    // Servers
    let http_server = HttpServer::new(
        config.server.port,
        AppState::new(Arc::clone(&broadcaster), Arc::clone(&orchestrator)),
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = http_server.run().await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&orchestrator),
        Arc::clone(&broadcaster),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Upstream sessions
    let client = reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .context("failed to build HTTP client")?;
    let sessions = build_sessions(&config, client).await;
    tracing::info!(
        streams = sessions.streams.len(),
        polls = sessions.polls.len(),
        "Sessions configured"
    );
    orchestrator
        .initialize(sessions)
        .context("failed to start sessions")?;

    tracing::info!("Market Feed Aggregator ready");

    await_shutdown(shutdown_token).await;

    let report = orchestrator.shutdown().await;
    if !report.errors.is_empty() {
        tracing::warn!(errors = report.errors.len(), "Some sessions did not stop cleanly");
    }
    let _ = broadcast_task.await;
    let _ = sweeper.await;

    tracing::info!("Market Feed Aggregator stopped");
    Ok(())
}

#[allow(clippy::expect_used)]
fn install_crypto_provider() {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");
}

/// Log the parsed configuration.
fn log_config(config: &AggregatorConfig) {
    tracing::info!(
        port = config.server.port,
        health_port = config.server.health_port,
        discovery = config.streams.discovery_enabled,
        max_symbols = config.streams.max_symbols_per_source,
        odds_enabled = config.polls.odds_api_key.is_some(),
        "Configuration loaded"
    );
    tracing::debug!(?config, "Full configuration");
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
    tracing::info!("Graceful shutdown started");
}
