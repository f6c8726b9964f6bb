//! Per-subscriber drain loop.
//!
//! One task per connected broker moves bars from the subscriber's buffer to
//! its outbound connection:
//!
//! ```text
//! Idle ──subscribe──► Subscribed ──buffer closed──► Draining ──► Closed
//!                         │
//!                         └──cancel / write error──────────────► Closed
//! ```
//!
//! Every path to `Closed` leaves the registry without the entry.

use tokio_util::sync::CancellationToken;

use crate::application::ports::{BarWriter, StreamError};
use crate::domain::subscription::{RegistryError, SharedRegistry, Subscription};
use crate::infrastructure::metrics;

/// How a stream ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamExit {
    /// The buffer was closed by the registry (replay ended or shutdown).
    /// Bars still queued at that point are discarded.
    Closed,
    /// The connection's cancellation signal fired.
    Cancelled,
}

/// Bridges the subscriber registry to outbound connections.
#[derive(Debug, Clone)]
pub struct StreamEndpoint {
    registry: SharedRegistry,
}

impl StreamEndpoint {
    /// Create an endpoint over `registry`.
    #[must_use]
    pub const fn new(registry: SharedRegistry) -> Self {
        Self { registry }
    }

    /// Register a new subscriber.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Closed`] once the replay has shut down.
    pub fn subscribe(&self) -> Result<Subscription, RegistryError> {
        let subscription = self.registry.subscribe()?;
        metrics::set_subscribers(self.registry.len());
        Ok(subscription)
    }

    /// Drain `subscription` into `writer` until closure, cancellation or a
    /// write failure.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Transport`] if a write fails. The subscriber is
    /// unsubscribed first; the write is not retried.
    pub async fn serve<W: BarWriter>(
        &self,
        subscription: Subscription,
        mut writer: W,
        cancel: CancellationToken,
    ) -> Result<StreamExit, StreamError> {
        let Subscription {
            id,
            mut receiver,
            counters,
        } = subscription;
        let mut written: u64 = 0;

        let result = loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => break Ok(StreamExit::Cancelled),
                next = receiver.recv() => next,
            };

            let Some(bar) = next else {
                break Ok(StreamExit::Closed);
            };

            tokio::select! {
                biased;
                () = cancel.cancelled() => break Ok(StreamExit::Cancelled),
                outcome = writer.write(bar) => match outcome {
                    Ok(()) => written += 1,
                    Err(e) => break Err(e),
                },
            }
        };

        // A closed buffer means the entry is already gone; this is then a no-op.
        self.registry.unsubscribe(id);
        metrics::set_subscribers(self.registry.len());
        metrics::record_bars_written(written);

        match &result {
            Ok(exit) => tracing::info!(
                subscriber_id = %id,
                exit = ?exit,
                written,
                dropped = counters.dropped(),
                "Subscriber stream ended"
            ),
            Err(e) => {
                metrics::record_stream_error();
                tracing::warn!(
                    subscriber_id = %id,
                    error = %e,
                    written,
                    dropped = counters.dropped(),
                    "Subscriber stream failed"
                );
            }
        }

        result
    }
}

// =============================================================================
// Tests
// =============================================================================
