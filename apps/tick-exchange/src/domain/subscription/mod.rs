//! Subscriber Registry
//!
//! Tracks the brokers currently streaming bars and fans each bar out to
//! them.
//!
//! # Design
//!
//! Every subscriber owns a bounded FIFO (a `tokio::sync::mpsc` channel of
//! fixed capacity). The registry keeps the sending half; the stream task
//! holds the receiving half.
//!
//! - The map lock is held only for insert, remove and snapshot. Sends happen
//!   after it is released.
//! - `broadcast` never waits. A full buffer drops the bar for that
//!   subscriber only and bumps its drop counter.
//! - Removing an entry drops its sender, so a reader blocked on `recv`
//!   observes closure.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use crate::domain::market::Bar;

/// Default per-subscriber buffer capacity.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 100;

// =============================================================================
// Types
// =============================================================================

/// Opaque handle identifying one subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Per-subscriber delivery counters, shared between the registry entry and
/// the subscription handle so they remain readable after removal.
#[derive(Debug, Default)]
pub struct SubscriberCounters {
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl SubscriberCounters {
    /// Bars accepted into the buffer.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Bars dropped because the buffer was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// A registered subscriber as seen by its stream task.
#[derive(Debug)]
pub struct Subscription {
    /// Handle used to unsubscribe.
    pub id: SubscriberId,
    /// Receiving end of the subscriber's bounded buffer.
    pub receiver: mpsc::Receiver<Bar>,
    /// Delivery counters for this subscriber.
    pub counters: Arc<SubscriberCounters>,
}

#[derive(Debug)]
struct SubscriberEntry {
    sender: mpsc::Sender<Bar>,
    counters: Arc<SubscriberCounters>,
}

/// Result of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    /// Subscribers that accepted the bar.
    pub delivered: usize,
    /// Subscribers whose buffer was full.
    pub dropped: usize,
    /// Subscribers whose reader has already gone away.
    pub closed: usize,
}

impl BroadcastOutcome {
    /// Number of subscribers in the snapshot.
    #[must_use]
    pub const fn recipients(&self) -> usize {
        self.delivered + self.dropped + self.closed
    }
}

/// Registry-wide statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Currently registered subscribers.
    pub subscribers: usize,
    /// Bars passed to `broadcast`.
    pub bars_broadcast: u64,
    /// Drops summed over every subscriber, including removed ones.
    pub bars_dropped: u64,
}

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The registry has been shut down.
    #[error("subscriber registry is closed")]
    Closed,
}

// =============================================================================
// Registry
// =============================================================================

/// Concurrency-safe set of active subscribers.
///
/// # Example
///
/// ```rust
/// use tick_exchange::domain::market::Bar;
/// use tick_exchange::domain::subscription::SubscriberRegistry;
///
/// let registry = SubscriberRegistry::new(8);
/// let mut subscription = registry.subscribe().unwrap();
///
/// let bar = Bar {
///     instrument: "SPFB.RTS".to_string(),
///     timestamp_key: 1,
///     open: 10,
///     high: 12,
///     low: 9,
///     close: 11,
///     volume: 5,
/// };
/// let outcome = registry.broadcast(&bar);
/// assert_eq!(outcome.delivered, 1);
/// assert_eq!(subscription.receiver.try_recv().unwrap(), bar);
///
/// assert!(registry.unsubscribe(subscription.id));
/// assert!(!registry.unsubscribe(subscription.id));
/// ```
#[derive(Debug)]
pub struct SubscriberRegistry {
    capacity: usize,
    entries: Mutex<HashMap<SubscriberId, SubscriberEntry>>,
    closed: AtomicBool,
    bars_broadcast: AtomicU64,
    bars_dropped: AtomicU64,
}

/// Shared registry reference.
pub type SharedRegistry = Arc<SubscriberRegistry>;

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_CAPACITY)
    }
}

impl SubscriberRegistry {
    /// Create a registry whose subscribers buffer up to `capacity` bars.
    ///
    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            bars_broadcast: AtomicU64::new(0),
            bars_dropped: AtomicU64::new(0),
        }
    }

    /// Per-subscriber buffer capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Register a new subscriber.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Closed`] after [`close`](Self::close).
    pub fn subscribe(&self) -> Result<Subscription, RegistryError> {
        let (sender, receiver) = mpsc::channel(self.capacity);
        let counters = Arc::new(SubscriberCounters::default());
        let id = SubscriberId::new();

        {
            let mut entries = self.entries.lock();
            // Checked under the lock so `close` cannot miss a late insert.
            if self.closed.load(Ordering::Acquire) {
                return Err(RegistryError::Closed);
            }
            entries.insert(
                id,
                SubscriberEntry {
                    sender,
                    counters: Arc::clone(&counters),
                },
            );
        }

        tracing::debug!(subscriber_id = %id, "Subscriber registered");

        Ok(Subscription {
            id,
            receiver,
            counters,
        })
    }

    /// Remove a subscriber and close its buffer.
    ///
    /// Returns `false` if the handle was not registered. Unsubscribing twice
    /// is harmless.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.entries.lock().remove(&id);
        match removed {
            Some(entry) => {
                tracing::debug!(
                    subscriber_id = %id,
                    delivered = entry.counters.delivered(),
                    dropped = entry.counters.dropped(),
                    "Subscriber removed"
                );
                true
            }
            None => false,
        }
    }

    /// Offer a bar to every current subscriber without blocking.
    pub fn broadcast(&self, bar: &Bar) -> BroadcastOutcome {
        let snapshot: Vec<(SubscriberId, mpsc::Sender<Bar>, Arc<SubscriberCounters>)> = self
            .entries
            .lock()
            .iter()
            .map(|(id, entry)| (*id, entry.sender.clone(), Arc::clone(&entry.counters)))
            .collect();

        self.bars_broadcast.fetch_add(1, Ordering::Relaxed);

        let mut outcome = BroadcastOutcome::default();
        for (id, sender, counters) in snapshot {
            match sender.try_send(bar.clone()) {
                Ok(()) => {
                    counters.delivered.fetch_add(1, Ordering::Relaxed);
                    outcome.delivered += 1;
                }
                Err(TrySendError::Full(_)) => {
                    counters.dropped.fetch_add(1, Ordering::Relaxed);
                    self.bars_dropped.fetch_add(1, Ordering::Relaxed);
                    outcome.dropped += 1;
                    tracing::trace!(subscriber_id = %id, "Subscriber buffer full, bar dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    outcome.closed += 1;
                }
            }
        }

        outcome
    }

    /// Shut the registry down, closing every subscriber buffer.
    ///
    /// Later `subscribe` calls fail. Calling `close` again is a no-op.
    pub fn close(&self) {
        let drained: Vec<SubscriberId> = {
            let mut entries = self.entries.lock();
            self.closed.store(true, Ordering::Release);
            entries.drain().map(|(id, _)| id).collect()
        };

        if !drained.is_empty() {
            tracing::info!(subscribers = drained.len(), "Closed subscriber buffers");
        }
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no subscriber is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop count of a registered subscriber.
    #[must_use]
    pub fn drop_count(&self, id: SubscriberId) -> Option<u64> {
        self.entries.lock().get(&id).map(|e| e.counters.dropped())
    }

    /// Snapshot of registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            subscribers: self.len(),
            bars_broadcast: self.bars_broadcast.load(Ordering::Relaxed),
            bars_dropped: self.bars_dropped.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn bar(close: i64) -> Bar {
        Bar {
            instrument: "SPFB.RTS".to_string(),
            timestamp_key: close,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1,
        }
    }

    #[test]
    fn subscribe_registers_entry() {
        let registry = SubscriberRegistry::new(4);
        let a = registry.subscribe().unwrap();
        let b = registry.subscribe().unwrap();

        assert_ne!(a.id, b.id);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.drop_count(a.id), Some(0));
    }

    #[test]
    fn zero_capacity_is_raised() {
        assert_eq!(SubscriberRegistry::new(0).capacity(), 1);
    }

    #[test]
    fn full_buffer_drops_for_that_subscriber_only() {
        let registry = SubscriberRegistry::new(1);
        let stalled = registry.subscribe().unwrap();
        let mut eager = registry.subscribe().unwrap();

        let first = registry.broadcast(&bar(1));
        assert_eq!(first.delivered, 2);
        // The eager reader keeps up; the stalled one never reads.
        assert_eq!(eager.receiver.try_recv().unwrap(), bar(1));

        let second = registry.broadcast(&bar(2));
        assert_eq!(second.delivered, 1);
        assert_eq!(second.dropped, 1);
        assert_eq!(eager.receiver.try_recv().unwrap(), bar(2));

        assert_eq!(registry.drop_count(stalled.id), Some(1));
        assert_eq!(stalled.counters.dropped(), 1);
        assert_eq!(stalled.counters.delivered(), 1);
        assert_eq!(registry.stats().bars_dropped, 1);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let registry = SubscriberRegistry::new(4);
        let sub = registry.subscribe().unwrap();

        assert!(registry.unsubscribe(sub.id));
        assert!(!registry.unsubscribe(sub.id));
        assert!(registry.is_empty());
    }

    #[test]
    fn broadcast_after_unsubscribe_skips_removed_handle() {
        let registry = SubscriberRegistry::new(4);
        let mut sub = registry.subscribe().unwrap();
        registry.unsubscribe(sub.id);

        let outcome = registry.broadcast(&bar(1));

        assert_eq!(outcome.recipients(), 0);
        assert!(matches!(
            sub.receiver.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
        assert_eq!(registry.drop_count(sub.id), None);
    }

    #[test]
    fn dropped_reader_counts_as_closed() {
        let registry = SubscriberRegistry::new(4);
        let sub = registry.subscribe().unwrap();
        drop(sub.receiver);

        let outcome = registry.broadcast(&bar(1));

        assert_eq!(outcome.closed, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn close_rejects_new_subscribers() {
        let registry = SubscriberRegistry::new(4);
        registry.close();
        registry.close();

        assert!(registry.is_closed());
        assert_eq!(registry.subscribe().unwrap_err(), RegistryError::Closed);
    }

    #[tokio::test]
    async fn close_wakes_blocked_reader() {
        let registry = Arc::new(SubscriberRegistry::new(4));
        let mut sub = registry.subscribe().unwrap();

        let reader = tokio::spawn(async move { sub.receiver.recv().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        registry.close();

        let received = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .unwrap()
            .unwrap();
        assert!(received.is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn preserves_order_per_subscriber() {
        let registry = SubscriberRegistry::new(8);
        let mut sub = registry.subscribe().unwrap();

        for close in 1..=5 {
            registry.broadcast(&bar(close));
        }

        let closes: Vec<i64> = std::iter::from_fn(|| sub.receiver.try_recv().ok())
            .map(|b| b.close)
            .collect();
        assert_eq!(closes, vec![1, 2, 3, 4, 5]);
        assert_eq!(registry.stats().bars_broadcast, 5);
    }
}
