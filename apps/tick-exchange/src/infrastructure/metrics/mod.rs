//! Prometheus Metrics Module
//!
//! Exposes replay and fan-out metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Feed**: Ticks ingested and batches aggregated
//! - **Fan-out**: Bars broadcast, delivered into buffers, dropped, written
//! - **Subscribers**: Active subscriber count and stream failures
//! - **Latency**: Per-batch aggregate-and-broadcast time
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::subscription::BroadcastOutcome;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the handle installed by the first one.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Feed counters
    describe_counter!(
        "exchange_ticks_ingested_total",
        "Total ticks read from the tick file"
    );
    describe_counter!(
        "exchange_batches_total",
        "Total same-timestamp batches aggregated"
    );

    // Fan-out counters
    describe_counter!(
        "exchange_bars_broadcast_total",
        "Total bars offered to the subscriber registry"
    );
    describe_counter!(
        "exchange_bars_delivered_total",
        "Total bars enqueued into subscriber buffers"
    );
    describe_counter!(
        "exchange_bars_dropped_total",
        "Total bars dropped because a subscriber buffer was full"
    );
    describe_counter!(
        "exchange_bars_written_total",
        "Total bars written to subscriber connections"
    );

    // Subscriber gauges
    describe_gauge!("exchange_subscribers", "Number of registered subscribers");

    // Error counters
    describe_counter!(
        "exchange_stream_errors_total",
        "Total subscriber streams ended by a transport error"
    );

    // Latency histograms
    describe_histogram!(
        "exchange_batch_processing_seconds",
        "Time to aggregate and broadcast one batch"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record one aggregated batch of `ticks` ticks.
pub fn record_batch(ticks: usize) {
    counter!("exchange_ticks_ingested_total").increment(ticks as u64);
    counter!("exchange_batches_total").increment(1);
}

/// Record the fan-out of one bar.
pub fn record_broadcast(outcome: &BroadcastOutcome) {
    counter!("exchange_bars_broadcast_total").increment(1);
    counter!("exchange_bars_delivered_total").increment(outcome.delivered as u64);
    if outcome.dropped > 0 {
        counter!("exchange_bars_dropped_total").increment(outcome.dropped as u64);
    }
}

/// Record bars written to one subscriber connection.
pub fn record_bars_written(count: u64) {
    counter!("exchange_bars_written_total").increment(count);
}

/// Update the registered subscriber count.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscribers(count: usize) {
    gauge!("exchange_subscribers").set(count as f64);
}

/// Record a subscriber stream that ended on a transport error.
pub fn record_stream_error() {
    counter!("exchange_stream_errors_total").increment(1);
}

/// Record batch processing duration.
pub fn record_processing_duration(duration: Duration) {
    histogram!("exchange_batch_processing_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
