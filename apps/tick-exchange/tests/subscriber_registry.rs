//! Subscriber Registry Integration Tests
//!
//! Tests fan-out ordering, drop accounting and producer liveness when
//! brokers stall.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use tick_exchange::{
    Bar, BarWriter, BroadcastService, CsvTickSource, FeedState, ReplayOptions, StreamEndpoint,
    StreamError, StreamExit, SubscriberRegistry,
};

fn make_bar(key: i64) -> Bar {
    Bar {
        instrument: "SPFB.RTS".to_string(),
        timestamp_key: key,
        open: key,
        high: key,
        low: key,
        close: key,
        volume: 1,
    }
}

/// Writer whose peer never reads.
struct StalledWriter;

#[async_trait]
impl BarWriter for StalledWriter {
    async fn write(&mut self, _bar: Bar) -> Result<(), StreamError> {
        std::future::pending().await
    }
}

/// Writer that accepts everything and counts it.
struct CountingWriter(Arc<std::sync::atomic::AtomicU64>);

#[async_trait]
impl BarWriter for CountingWriter {
    async fn write(&mut self, _bar: Bar) -> Result<(), StreamError> {
        self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(())
    }
}

fn tick_file(batches: i64) -> tempfile::NamedTempFile {
    use std::io::Write;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "<TICKER>,<PER>,<DATE>,<TIME>,<LAST>,<VOL>").unwrap();
    for key in 0..batches {
        writeln!(file, "SPFB.RTS,0,20190517,{key},{},1", 1000 + key).unwrap();
    }
    file
}

// =============================================================================
// Drop Accounting
// =============================================================================

#[tokio::test]
async fn test_full_buffer_drops_only_for_that_subscriber() {
    let registry = SubscriberRegistry::new(1);
    let mut stalled = registry.subscribe().unwrap();
    let mut prompt = registry.subscribe().unwrap();

    registry.broadcast(&make_bar(1));
    assert_eq!(prompt.receiver.recv().await.unwrap().timestamp_key, 1);

    let outcome = registry.broadcast(&make_bar(2));
    assert_eq!(outcome.delivered, 1);
    assert_eq!(outcome.dropped, 1);
    assert_eq!(prompt.receiver.recv().await.unwrap().timestamp_key, 2);

    assert_eq!(registry.drop_count(stalled.id), Some(1));
    assert_eq!(registry.drop_count(prompt.id), Some(0));

    // The stalled subscriber still has exactly one of the two bars.
    assert_eq!(stalled.receiver.recv().await.unwrap().timestamp_key, 1);
    assert!(stalled.receiver.try_recv().is_err());
}

#[tokio::test]
async fn test_each_subscriber_sees_bars_in_broadcast_order() {
    let registry = SubscriberRegistry::new(64);
    let mut subs: Vec<_> = (0..4).map(|_| registry.subscribe().unwrap()).collect();

    for key in 0..50 {
        registry.broadcast(&make_bar(key));
    }

    for sub in &mut subs {
        let mut received = Vec::new();
        while let Ok(bar) = sub.receiver.try_recv() {
            received.push(bar.timestamp_key);
        }
        assert_eq!(received, (0..50).collect::<Vec<_>>());
    }
}

// =============================================================================
// Liveness
// =============================================================================

#[tokio::test]
async fn test_stalled_broker_does_not_block_replay() {
    let registry = Arc::new(SubscriberRegistry::new(4));
    let endpoint = StreamEndpoint::new(Arc::clone(&registry));
    let state = Arc::new(FeedState::new());
    let delivered = Arc::new(std::sync::atomic::AtomicU64::new(0));

    let stalled = endpoint.subscribe().unwrap();
    let stalled_id = stalled.id;
    let stalled_task = tokio::spawn({
        let endpoint = endpoint.clone();
        async move {
            endpoint
                .serve(stalled, StalledWriter, CancellationToken::new())
                .await
        }
    });

    let healthy = endpoint.subscribe().unwrap();
    let healthy_task = tokio::spawn({
        let endpoint = endpoint.clone();
        let writer = CountingWriter(Arc::clone(&delivered));
        async move {
            endpoint
                .serve(healthy, writer, CancellationToken::new())
                .await
        }
    });

    let file = tick_file(200);
    let source = CsvTickSource::open(file.path(), ReplayOptions::new(Duration::ZERO)).unwrap();
    let summary = timeout(
        Duration::from_secs(5),
        BroadcastService::new(source, Arc::clone(&registry), state).run(CancellationToken::new()),
    )
    .await
    .expect("replay blocked on a stalled broker")
    .unwrap();

    assert_eq!(summary.bars, 200);
    assert!(summary.dropped > 0);
    assert!(registry.stats().bars_dropped >= summary.dropped);
    assert!(registry.drop_count(stalled_id).is_none());

    // Closing the registry ends the stream that keeps up.
    let exit = timeout(Duration::from_secs(2), healthy_task)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(exit, Ok(StreamExit::Closed));
    assert!(delivered.load(std::sync::atomic::Ordering::Relaxed) > 0);

    stalled_task.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_subscribe_unsubscribe_during_broadcast() {
    let registry = Arc::new(SubscriberRegistry::new(8));
    let stop = CancellationToken::new();

    let producer = tokio::spawn({
        let registry = Arc::clone(&registry);
        let stop = stop.clone();
        async move {
            let mut key = 0;
            while !stop.is_cancelled() {
                registry.broadcast(&make_bar(key));
                key += 1;
                tokio::task::yield_now().await;
            }
            key
        }
    });

    let mut churn = Vec::new();
    for _ in 0..8 {
        let registry = Arc::clone(&registry);
        churn.push(tokio::spawn(async move {
            for _ in 0..50 {
                let sub = registry.subscribe().unwrap();
                tokio::task::yield_now().await;
                assert!(registry.unsubscribe(sub.id));
                assert!(!registry.unsubscribe(sub.id));
            }
        }));
    }

    for handle in churn {
        timeout(Duration::from_secs(5), handle)
            .await
            .expect("subscribe/unsubscribe deadlocked")
            .unwrap();
    }
    stop.cancel();
    let broadcasts = producer.await.unwrap();

    assert!(registry.is_empty());
    assert_eq!(registry.stats().bars_broadcast, broadcasts as u64);
}
