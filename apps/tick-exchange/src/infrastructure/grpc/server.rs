//! gRPC Exchange Server Implementation
//!
//! Implements the `ExchangeService` gRPC service: the `Statistic` bar stream
//! and the `GetStatus` unary call.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prost_types::Timestamp;
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::Instrument;

use super::proto::exchange::v1::{
    BrokerId, GetStatusRequest, GetStatusResponse, Ohlcv, ReplayState,
    exchange_service_server::ExchangeService,
};
use crate::application::ports::{BarWriter, StreamError};
use crate::application::services::{FeedState, ReplayPhase, StreamEndpoint};
use crate::domain::market::Bar;
use crate::domain::subscription::SharedRegistry;

// =============================================================================
// Type Aliases
// =============================================================================

type GrpcResult<T> = Result<Response<T>, Status>;
type BoxedStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>;

/// Bars buffered between a stream task and tonic's response encoder.
///
/// Small on purpose: backpressure belongs to the subscriber buffer, where
/// overflow is counted.
const OUTBOUND_BUFFER: usize = 4;

// =============================================================================
// Server Configuration
// =============================================================================

/// Configuration for the gRPC exchange server.
#[derive(Debug, Clone)]
pub struct ExchangeServerConfig {
    /// Exchange version string.
    pub version: String,
    /// Tick interval reported in every bar.
    pub tick_interval: Duration,
}

impl Default for ExchangeServerConfig {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            tick_interval: Duration::from_secs(1),
        }
    }
}

// =============================================================================
// Bar Writer
// =============================================================================

/// [`BarWriter`] over the response channel of one `Statistic` call.
#[derive(Debug)]
pub struct GrpcBarWriter {
    tx: mpsc::Sender<Result<Ohlcv, Status>>,
    sequence: i64,
    interval_ms: i64,
}

impl GrpcBarWriter {
    /// Wrap the response channel of a stream.
    #[must_use]
    pub fn new(tx: mpsc::Sender<Result<Ohlcv, Status>>, tick_interval: Duration) -> Self {
        Self {
            tx,
            sequence: 0,
            interval_ms: i64::try_from(tick_interval.as_millis()).unwrap_or(i64::MAX),
        }
    }
}

#[async_trait]
impl BarWriter for GrpcBarWriter {
    async fn write(&mut self, bar: Bar) -> Result<(), StreamError> {
        self.sequence += 1;
        let message = bar_to_proto(&bar, self.sequence, self.interval_ms);
        self.tx
            .send(Ok(message))
            .await
            .map_err(|_| StreamError::Transport("response stream closed".to_string()))
    }
}

// =============================================================================
// Server Implementation
// =============================================================================

/// gRPC server streaming aggregated bars to brokers.
pub struct ExchangeServer {
    config: ExchangeServerConfig,
    endpoint: StreamEndpoint,
    registry: SharedRegistry,
    state: Arc<FeedState>,
    shutdown: CancellationToken,
}

impl ExchangeServer {
    /// Create a new gRPC exchange server.
    ///
    /// Every stream task runs under a child of `shutdown`.
    #[must_use]
    pub fn new(
        config: ExchangeServerConfig,
        registry: SharedRegistry,
        state: Arc<FeedState>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            endpoint: StreamEndpoint::new(Arc::clone(&registry)),
            registry,
            state,
            shutdown,
        }
    }
}

#[tonic::async_trait]
impl ExchangeService for ExchangeServer {
    type StatisticStream = BoxedStream<Ohlcv>;

    async fn statistic(&self, request: Request<BrokerId>) -> GrpcResult<Self::StatisticStream> {
        let broker_id = request.into_inner().id;

        let subscription = self.endpoint.subscribe().map_err(|e| {
            tracing::info!(broker_id, error = %e, "Rejected subscriber");
            Status::unavailable(e.to_string())
        })?;
        let subscriber_id = subscription.id;
        tracing::info!(broker_id, subscriber_id = %subscriber_id, "Subscriber connected");

        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        let cancel = self.shutdown.child_token();
        let endpoint = self.endpoint.clone();
        let writer = GrpcBarWriter::new(tx.clone(), self.config.tick_interval);

        // Client disconnect drops the response stream, which closes `tx`.
        tokio::spawn({
            let cancel = cancel.clone();
            async move {
                tokio::select! {
                    () = tx.closed() => cancel.cancel(),
                    () = cancel.cancelled() => {}
                }
            }
        });

        let span = tracing::info_span!("statistic", broker_id, subscriber_id = %subscriber_id);
        tokio::spawn(
            async move {
                if let Err(e) = endpoint.serve(subscription, writer, cancel.clone()).await {
                    tracing::debug!(error = %e, "Bar stream closed by transport failure");
                }
                cancel.cancel();
            }
            .instrument(span),
        );

        let stream = ReceiverStream::new(rx);
        Ok(Response::new(Box::pin(stream) as Self::StatisticStream))
    }

    async fn get_status(
        &self,
        _request: Request<GetStatusRequest>,
    ) -> GrpcResult<GetStatusResponse> {
        let stats = self.registry.stats();

        Ok(Response::new(GetStatusResponse {
            version: self.config.version.clone(),
            started_at: Some(datetime_to_timestamp(self.state.started_at())),
            replay_state: phase_to_proto(self.state.phase()).into(),
            error_message: self.state.error_message(),
            subscriber_count: i32::try_from(stats.subscribers).unwrap_or(i32::MAX),
            bars_broadcast: i64::try_from(stats.bars_broadcast).unwrap_or(i64::MAX),
            bars_dropped: i64::try_from(stats.bars_dropped).unwrap_or(i64::MAX),
            ticks_ingested: i64::try_from(self.state.ticks_ingested()).unwrap_or(i64::MAX),
        }))
    }
}

// =============================================================================
// Conversion Helpers
// =============================================================================

fn datetime_to_timestamp(dt: DateTime<Utc>) -> Timestamp {
    Timestamp {
        seconds: dt.timestamp(),
        nanos: i32::try_from(dt.timestamp_subsec_nanos()).unwrap_or(i32::MAX),
    }
}

const fn phase_to_proto(phase: ReplayPhase) -> ReplayState {
    match phase {
        ReplayPhase::Starting => ReplayState::Starting,
        ReplayPhase::Replaying => ReplayState::Replaying,
        ReplayPhase::Finished => ReplayState::Finished,
        ReplayPhase::Failed => ReplayState::Failed,
    }
}

fn bar_to_proto(bar: &Bar, sequence: i64, interval_ms: i64) -> Ohlcv {
    Ohlcv {
        id: sequence,
        time: bar.timestamp_key,
        interval: interval_ms,
        open: bar.open,
        high: bar.high,
        low: bar.low,
        close: bar.close,
        volume: bar.volume,
        ticker: bar.instrument.clone(),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::subscription::SubscriberRegistry;

    fn bar(close: i64) -> Bar {
        Bar {
            instrument: "SPFB.RTS".to_string(),
            timestamp_key: 100_000,
            open: 1000,
            high: 1005,
            low: 995,
            close,
            volume: 6,
        }
    }

    #[test]
    fn bar_conversion() {
        let proto = bar_to_proto(&bar(995), 3, 1000);

        assert_eq!(proto.id, 3);
        assert_eq!(proto.time, 100_000);
        assert_eq!(proto.interval, 1000);
        assert_eq!(
            (proto.open, proto.high, proto.low, proto.close),
            (1000, 1005, 995, 995)
        );
        assert_eq!(proto.volume, 6);
        assert_eq!(proto.ticker, "SPFB.RTS");
    }

    #[test]
    fn datetime_conversion() {
        let dt = Utc::now();
        let ts = datetime_to_timestamp(dt);
        let expected_nanos = i32::try_from(dt.timestamp_subsec_nanos()).unwrap_or(i32::MAX);

        assert_eq!(ts.seconds, dt.timestamp());
        assert_eq!(ts.nanos, expected_nanos);
    }

    #[test]
    fn phase_mapping() {
        assert_eq!(phase_to_proto(ReplayPhase::Starting), ReplayState::Starting);
        assert_eq!(phase_to_proto(ReplayPhase::Replaying), ReplayState::Replaying);
        assert_eq!(phase_to_proto(ReplayPhase::Finished), ReplayState::Finished);
        assert_eq!(phase_to_proto(ReplayPhase::Failed), ReplayState::Failed);
    }

    #[tokio::test]
    async fn writer_numbers_bars_per_stream() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut writer = GrpcBarWriter::new(tx, Duration::from_millis(250));

        writer.write(bar(1)).await.unwrap();
        writer.write(bar(2)).await.unwrap();

        let first = rx.recv().await.unwrap().unwrap();
        let second = rx.recv().await.unwrap().unwrap();
        assert_eq!((first.id, first.close, first.interval), (1, 1, 250));
        assert_eq!((second.id, second.close), (2, 2));
    }

    #[tokio::test]
    async fn writer_fails_once_receiver_is_gone() {
        let (tx, rx) = mpsc::channel(4);
        let mut writer = GrpcBarWriter::new(tx, Duration::from_secs(1));
        drop(rx);

        let err = writer.write(bar(1)).await.unwrap_err();
        assert!(matches!(err, StreamError::Transport(_)));
    }

    #[tokio::test]
    async fn status_reports_feed_and_registry() {
        let registry = Arc::new(SubscriberRegistry::new(4));
        let state = Arc::new(FeedState::new());
        let _sub = registry.subscribe().unwrap();
        registry.broadcast(&bar(1));
        state.set_phase(ReplayPhase::Replaying);
        state.record_batch(3, 100_000);

        let server = ExchangeServer::new(
            ExchangeServerConfig::default(),
            Arc::clone(&registry),
            state,
            CancellationToken::new(),
        );
        let status = server
            .get_status(Request::new(GetStatusRequest {}))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(status.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(status.replay_state(), ReplayState::Replaying);
        assert_eq!(status.subscriber_count, 1);
        assert_eq!(status.bars_broadcast, 1);
        assert_eq!(status.bars_dropped, 0);
        assert_eq!(status.ticks_ingested, 3);
        assert!(status.error_message.is_none());
    }

    #[tokio::test]
    async fn statistic_unavailable_after_close() {
        let registry = Arc::new(SubscriberRegistry::new(4));
        registry.close();
        let server = ExchangeServer::new(
            ExchangeServerConfig::default(),
            registry,
            Arc::new(FeedState::new()),
            CancellationToken::new(),
        );

        let Err(status) = server.statistic(Request::new(BrokerId { id: 1 })).await else {
            panic!("expected subscribe to be rejected");
        };
        assert_eq!(status.code(), tonic::Code::Unavailable);
    }
}
