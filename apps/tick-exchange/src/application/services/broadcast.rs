//! Replay producer: tick feed → aggregator → registry.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use super::feed_state::{FeedState, ReplayPhase};
use crate::application::ports::{FeedError, TickFeed};
use crate::domain::market::aggregate;
use crate::domain::subscription::SharedRegistry;
use crate::infrastructure::metrics;

/// Totals of one replay run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Bars aggregated and broadcast.
    pub bars: u64,
    /// Ticks aggregated.
    pub ticks: u64,
    /// Per-subscriber drops caused by full buffers.
    pub dropped: u64,
    /// Whether the run was stopped by cancellation rather than end of input.
    pub cancelled: bool,
}

/// Single producer task that drives the replay.
///
/// Reads batches from the feed, aggregates each into a bar and broadcasts it.
/// Whatever ends the run (end of input, cancellation or a feed error), the
/// registry is closed afterwards so every stream task observes closure.
pub struct BroadcastService<F> {
    feed: F,
    registry: SharedRegistry,
    state: Arc<FeedState>,
}

impl<F: TickFeed> BroadcastService<F> {
    /// Create a producer over `feed` broadcasting into `registry`.
    pub const fn new(feed: F, registry: SharedRegistry, state: Arc<FeedState>) -> Self {
        Self {
            feed,
            registry,
            state,
        }
    }

    /// Run until the feed is exhausted, fails, or `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns the [`FeedError`] that stopped the feed. Feed errors are fatal
    /// to the replay; nothing is retried.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<ReplaySummary, FeedError> {
        self.state.set_phase(ReplayPhase::Replaying);
        tracing::info!("Replay started");

        let result = self.pump(&cancel).await;
        self.registry.close();

        match &result {
            Ok(summary) => {
                self.state.set_phase(ReplayPhase::Finished);
                tracing::info!(
                    bars = summary.bars,
                    ticks = summary.ticks,
                    dropped = summary.dropped,
                    cancelled = summary.cancelled,
                    "Replay finished"
                );
            }
            Err(e) => {
                self.state.set_error(e.to_string());
                tracing::error!(error = %e, "Replay failed");
            }
        }

        result
    }

    async fn pump(&mut self, cancel: &CancellationToken) -> Result<ReplaySummary, FeedError> {
        let mut summary = ReplaySummary::default();

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    summary.cancelled = true;
                    break;
                }
                next = self.feed.next_batch() => next?,
            };

            let Some(batch) = next else {
                break;
            };

            let started = Instant::now();
            let bar = aggregate(&batch);
            let outcome = self.registry.broadcast(&bar);

            self.state.record_batch(batch.len(), batch.timestamp_key());
            metrics::record_batch(batch.len());
            metrics::record_broadcast(&outcome);
            metrics::record_processing_duration(started.elapsed());

            summary.bars += 1;
            summary.ticks += batch.len() as u64;
            summary.dropped += outcome.dropped as u64;

            tracing::debug!(
                timestamp_key = bar.timestamp_key,
                open = bar.open,
                high = bar.high,
                low = bar.low,
                close = bar.close,
                volume = bar.volume,
                delivered = outcome.delivered,
                dropped = outcome.dropped,
                "Bar broadcast"
            );
        }

        Ok(summary)
    }
}

// =============================================================================
// Tests
// =============================================================================
