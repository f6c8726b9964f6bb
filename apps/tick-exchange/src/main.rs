//! Tick Exchange Binary
//!
//! Replays the configured tick file and streams OHLCV bars to brokers until
//! the file is exhausted or the process is signalled.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin tick-exchange
//! ```
//!
//! # Environment Variables
//!
//! - `EXCHANGE_ADDR`: gRPC listen address (default: 0.0.0.0:8080)
//! - `EXCHANGE_DATA_FILE`: Tick file (default: ./data/SPFB.RTS_190517_190517.csv)
//! - `EXCHANGE_TICK_INTERVAL_MS`: Minimum spacing between bars (default: 1000)
//! - `EXCHANGE_TICKERS`: Comma-separated instrument allow-list (default: SPFB.RTS)
//! - `EXCHANGE_SUBSCRIBER_BUFFER`: Bars buffered per broker (default: 100)
//! - `EXCHANGE_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tick_exchange::infrastructure::config::load_dotenv;
use tick_exchange::infrastructure::telemetry;
use tick_exchange::proto::exchange_service_server::ExchangeServiceServer;
use tick_exchange::{
    BroadcastService, CsvTickSource, ExchangeConfig, ExchangeServer, ExchangeServerConfig,
    FeedState, HealthServer, HealthServerState, ReplayOptions, SubscriberRegistry, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting tick exchange");

    let _metrics_handle = init_metrics();

    let config = ExchangeConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();
    let registry = Arc::new(SubscriberRegistry::new(config.server.subscriber_buffer));
    let feed_state = Arc::new(FeedState::new());

    let source = CsvTickSource::open(&config.feed.data_file, ReplayOptions::from(&config.feed))
        .with_context(|| format!("opening tick file {}", config.feed.data_file.display()))?;

    // Spawn health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&feed_state),
        Arc::clone(&registry),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    let health_handle = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Spawn gRPC server
    let grpc_server = ExchangeServer::new(
        ExchangeServerConfig {
            version: env!("CARGO_PKG_VERSION").to_string(),
            tick_interval: config.feed.tick_interval,
        },
        Arc::clone(&registry),
        Arc::clone(&feed_state),
        shutdown_token.clone(),
    );
    let grpc_addr = config.server.addr;
    let grpc_shutdown = shutdown_token.clone();
    let grpc_handle = tokio::spawn(async move {
        tracing::info!(addr = %grpc_addr, "gRPC server listening");
        if let Err(e) = Server::builder()
            .add_service(ExchangeServiceServer::new(grpc_server))
            .serve_with_shutdown(grpc_addr, grpc_shutdown.cancelled_owned())
            .await
        {
            tracing::error!(error = %e, "gRPC server error");
        }
        tracing::info!("gRPC server stopped");
    });

    tokio::spawn(cancel_on_signal(shutdown_token.clone()));

    tracing::info!("Tick exchange ready");

    // The replay drives the process lifetime.
    let replay = BroadcastService::new(source, Arc::clone(&registry), feed_state)
        .run(shutdown_token.clone())
        .await;

    shutdown_token.cancel();
    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        let _ = grpc_handle.await;
        let _ = health_handle.await;
    })
    .await;
    if drained.is_err() {
        tracing::warn!("Servers did not stop before the shutdown timeout");
    }

    let summary = replay.context("replay failed")?;
    tracing::info!(
        bars = summary.bars,
        ticks = summary.ticks,
        dropped = summary.dropped,
        "Tick exchange stopped"
    );
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &ExchangeConfig) {
    tracing::info!(
        addr = %config.server.addr,
        health_port = config.server.health_port,
        subscriber_buffer = config.server.subscriber_buffer,
        data_file = %config.feed.data_file.display(),
        tick_interval_ms = u64::try_from(config.feed.tick_interval.as_millis()).unwrap_or(u64::MAX),
        tickers = ?config.feed.tickers,
        "Configuration loaded"
    );
}

/// Cancel `shutdown_token` on SIGTERM or SIGINT.
#[allow(clippy::expect_used)]
async fn cancel_on_signal(shutdown_token: CancellationToken) {
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
        () = shutdown_token.cancelled() => return,
    }

    shutdown_token.cancel();
}
