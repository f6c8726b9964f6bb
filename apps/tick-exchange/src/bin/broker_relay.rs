//! Broker Relay Binary
//!
//! Subscribes to the tick exchange's bar stream and logs every bar.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin broker-relay
//! ```
//!
//! # Environment Variables
//!
//! - `BROKER_EXCHANGE_URL`: Exchange endpoint (default: <http://127.0.0.1:8080>)
//! - `BROKER_ID`: Broker id sent on subscribe (default: 1)
//! - `BROKER_RECONNECT_DELAY_INITIAL_MS`: First retry delay (default: 500)
//! - `BROKER_RECONNECT_DELAY_MAX_SECS`: Retry delay cap (default: 30)
//! - `BROKER_RECONNECT_DELAY_MULTIPLIER`: Backoff multiplier (default: 2.0)
//! - `BROKER_MAX_RECONNECT_ATTEMPTS`: Retry budget, 0 = unlimited (default: 0)
//! - `RUST_LOG`: Log level (default: info)

use tick_exchange::infrastructure::config::load_dotenv;
use tick_exchange::infrastructure::telemetry::{self, RELAY_SERVICE_NAME, TelemetryConfig};
use tick_exchange::{BrokerRelay, RelayConfig};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let _telemetry_guard =
        telemetry::init_with_config(TelemetryConfig::from_env(RELAY_SERVICE_NAME));

    let config = RelayConfig::from_env()?;
    tracing::info!(
        url = %config.exchange_url,
        broker_id = config.broker_id,
        "Starting broker relay"
    );

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received Ctrl+C, stopping relay");
                cancel.cancel();
            }
        }
    });

    let summary = BrokerRelay::new(config, cancel).run().await?;
    tracing::info!(
        bars = summary.bars_received,
        sessions = summary.sessions,
        cancelled = summary.cancelled,
        "Broker relay stopped"
    );
    Ok(())
}
