//! Broker Relay
//!
//! Client side of the bar stream: connects to the exchange, subscribes with a
//! broker id and logs every bar. Connection failures are retried with
//! exponential backoff; a stream that ends cleanly means the replay finished
//! and the relay stops.

mod backoff;

pub use backoff::Backoff;

use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;

use crate::infrastructure::config::RelayConfig;
use crate::infrastructure::grpc::proto::exchange::v1::{
    BrokerId, Ohlcv, exchange_service_client::ExchangeServiceClient,
};

/// Totals of one relay run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelaySummary {
    /// Bars received across all sessions.
    pub bars_received: u64,
    /// Streams opened successfully.
    pub sessions: u32,
    /// Whether the run was stopped by cancellation.
    pub cancelled: bool,
}

/// Broker relay errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Every allowed reconnection attempt failed.
    #[error("gave up after {attempts} reconnection attempts: {last_error}")]
    Exhausted {
        /// Reconnection attempts made.
        attempts: u32,
        /// Error of the final attempt.
        last_error: String,
    },
}

enum SessionEnd {
    /// Exchange closed the stream normally.
    Finished,
    Cancelled,
}

/// Relays the exchange's bar stream into the log.
pub struct BrokerRelay {
    config: RelayConfig,
    cancel: CancellationToken,
}

impl BrokerRelay {
    /// Create a relay.
    #[must_use]
    pub const fn new(config: RelayConfig, cancel: CancellationToken) -> Self {
        Self { config, cancel }
    }

    /// Run until the exchange finishes the stream, `cancel` fires, or the
    /// reconnection budget is spent.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Exhausted`] when reconnection gives up.
    pub async fn run(self) -> Result<RelaySummary, RelayError> {
        let mut backoff = Backoff::new(&self.config.reconnect);
        let mut summary = RelaySummary::default();

        loop {
            match self.session(&mut backoff, &mut summary).await {
                Ok(SessionEnd::Finished) => {
                    tracing::info!(bars = summary.bars_received, "Exchange finished the stream");
                    return Ok(summary);
                }
                Ok(SessionEnd::Cancelled) => {
                    summary.cancelled = true;
                    return Ok(summary);
                }
                Err(status) => {
                    let Some(delay) = backoff.next_delay() else {
                        return Err(RelayError::Exhausted {
                            attempts: backoff.attempts(),
                            last_error: status.to_string(),
                        });
                    };
                    tracing::warn!(
                        error = %status,
                        attempt = backoff.attempts(),
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Exchange connection failed, retrying"
                    );

                    tokio::select! {
                        () = self.cancel.cancelled() => {
                            summary.cancelled = true;
                            return Ok(summary);
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn session(
        &self,
        backoff: &mut Backoff,
        summary: &mut RelaySummary,
    ) -> Result<SessionEnd, tonic::Status> {
        let mut client = tokio::select! {
            () = self.cancel.cancelled() => return Ok(SessionEnd::Cancelled),
            client = ExchangeServiceClient::<Channel>::connect(self.config.exchange_url.clone()) => {
                client.map_err(|e| tonic::Status::unavailable(e.to_string()))?
            }
        };

        let mut stream = client
            .statistic(BrokerId {
                id: self.config.broker_id,
            })
            .await?
            .into_inner();

        backoff.reset();
        summary.sessions += 1;
        tracing::info!(
            url = %self.config.exchange_url,
            broker_id = self.config.broker_id,
            "Subscribed to exchange"
        );

        loop {
            let message = tokio::select! {
                () = self.cancel.cancelled() => return Ok(SessionEnd::Cancelled),
                message = stream.message() => message?,
            };

            let Some(bar) = message else {
                return Ok(SessionEnd::Finished);
            };
            summary.bars_received += 1;
            log_bar(&bar);
        }
    }
}

fn log_bar(bar: &Ohlcv) {
    tracing::info!(
        seq = bar.id,
        ticker = %bar.ticker,
        time = bar.time,
        interval_ms = bar.interval,
        open = bar.open,
        high = bar.high,
        low = bar.low,
        close = bar.close,
        volume = bar.volume,
        "ohlcv"
    );
}
