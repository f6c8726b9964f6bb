//! Replay progress shared between the producer and the status surfaces.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

/// Lifecycle of the replay feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayPhase {
    /// Process started, feed not yet running.
    Starting,
    /// Batches are being read and broadcast.
    Replaying,
    /// Input exhausted or replay stopped on shutdown.
    Finished,
    /// Replay aborted on a feed error.
    Failed,
}

impl ReplayPhase {
    /// Lowercase name used in logs and health output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Replaying => "replaying",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }
}

/// Tracks the state of the replay feed.
#[derive(Debug)]
pub struct FeedState {
    phase: RwLock<ReplayPhase>,
    error_message: RwLock<Option<String>>,
    started_at: DateTime<Utc>,
    ticks_ingested: AtomicU64,
    batches_emitted: AtomicU64,
    last_timestamp_key: AtomicI64,
}

impl Default for FeedState {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedState {
    /// Create a tracker in the `Starting` phase.
    #[must_use]
    pub fn new() -> Self {
        Self {
            phase: RwLock::new(ReplayPhase::Starting),
            error_message: RwLock::new(None),
            started_at: Utc::now(),
            ticks_ingested: AtomicU64::new(0),
            batches_emitted: AtomicU64::new(0),
            last_timestamp_key: AtomicI64::new(0),
        }
    }

    /// Set the replay phase.
    pub fn set_phase(&self, phase: ReplayPhase) {
        *self.phase.write() = phase;
    }

    /// Mark the replay as failed with a message.
    pub fn set_error(&self, message: String) {
        *self.phase.write() = ReplayPhase::Failed;
        *self.error_message.write() = Some(message);
    }

    /// Record one broadcast batch.
    pub fn record_batch(&self, ticks: usize, timestamp_key: i64) {
        self.ticks_ingested
            .fetch_add(u64::try_from(ticks).unwrap_or(u64::MAX), Ordering::Relaxed);
        self.batches_emitted.fetch_add(1, Ordering::Relaxed);
        self.last_timestamp_key
            .store(timestamp_key, Ordering::Relaxed);
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> ReplayPhase {
        *self.phase.read()
    }

    /// Error that failed the replay, if any.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        self.error_message.read().clone()
    }

    /// When the tracker was created.
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Ticks aggregated so far.
    #[must_use]
    pub fn ticks_ingested(&self) -> u64 {
        self.ticks_ingested.load(Ordering::Relaxed)
    }

    /// Batches aggregated so far.
    #[must_use]
    pub fn batches_emitted(&self) -> u64 {
        self.batches_emitted.load(Ordering::Relaxed)
    }

    /// Timestamp key of the most recent batch.
    #[must_use]
    pub fn last_timestamp_key(&self) -> i64 {
        self.last_timestamp_key.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_state_transitions() {
        let state = FeedState::new();
        assert_eq!(state.phase(), ReplayPhase::Starting);

        state.set_phase(ReplayPhase::Replaying);
        assert_eq!(state.phase(), ReplayPhase::Replaying);

        state.set_error("bad row".to_string());
        assert_eq!(state.phase(), ReplayPhase::Failed);
        assert_eq!(state.error_message().as_deref(), Some("bad row"));
    }

    #[test]
    fn feed_state_counters() {
        let state = FeedState::new();

        state.record_batch(3, 100);
        state.record_batch(2, 101);

        assert_eq!(state.ticks_ingested(), 5);
        assert_eq!(state.batches_emitted(), 2);
        assert_eq!(state.last_timestamp_key(), 101);
    }
}
