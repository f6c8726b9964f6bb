//! Broker Relay Integration Tests
//!
//! Runs the relay against a real exchange server on an ephemeral port.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

use tick_exchange::{
    Bar, BrokerRelay, ExchangeServer, ExchangeServerConfig, FeedState, ReconnectSettings,
    RelayConfig, RelayError, SharedRegistry, SubscriberRegistry,
    proto::exchange_service_server::ExchangeServiceServer,
};

async fn start_exchange() -> (String, SharedRegistry, tokio::task::JoinHandle<()>) {
    let registry = Arc::new(SubscriberRegistry::new(16));
    let server = ExchangeServer::new(
        ExchangeServerConfig::default(),
        Arc::clone(&registry),
        Arc::new(FeedState::new()),
        CancellationToken::new(),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        Server::builder()
            .add_service(ExchangeServiceServer::new(server))
            .serve_with_incoming(tokio_stream::wrappers::TcpListenerStream::new(listener))
            .await
            .unwrap();
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    (format!("http://{addr}"), registry, handle)
}

fn relay_config(url: String, max_attempts: u32) -> RelayConfig {
    RelayConfig {
        exchange_url: url,
        broker_id: 7,
        reconnect: ReconnectSettings {
            delay_initial: Duration::from_millis(10),
            delay_max: Duration::from_millis(50),
            delay_multiplier: 2.0,
            max_attempts,
        },
    }
}

fn make_bar(key: i64) -> Bar {
    Bar {
        instrument: "SPFB.RTS".to_string(),
        timestamp_key: key,
        open: 100,
        high: 110,
        low: 90,
        close: 105,
        volume: 2,
    }
}

#[tokio::test]
async fn test_relay_receives_bars_until_exchange_finishes() {
    let (url, registry, handle) = start_exchange().await;
    let relay = tokio::spawn(BrokerRelay::new(relay_config(url, 3), CancellationToken::new()).run());

    timeout(Duration::from_secs(2), async {
        while registry.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("relay never subscribed");

    for key in 0..3 {
        registry.broadcast(&make_bar(key));
    }
    registry.close();

    let summary = timeout(Duration::from_secs(2), relay)
        .await
        .expect("relay did not stop")
        .unwrap()
        .unwrap();
    assert_eq!(summary.bars_received, 3);
    assert_eq!(summary.sessions, 1);
    assert!(!summary.cancelled);

    handle.abort();
}

#[tokio::test]
async fn test_relay_gives_up_after_max_attempts() {
    // Reserve a port, then free it so connections are refused.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let result = timeout(
        Duration::from_secs(5),
        BrokerRelay::new(relay_config(url, 2), CancellationToken::new()).run(),
    )
    .await
    .expect("relay kept retrying");

    assert!(matches!(result, Err(RelayError::Exhausted { attempts: 2, .. })));
}

#[tokio::test]
async fn test_relay_stops_on_cancel() {
    let (url, registry, handle) = start_exchange().await;
    let cancel = CancellationToken::new();
    let relay = tokio::spawn(BrokerRelay::new(relay_config(url, 0), cancel.clone()).run());

    timeout(Duration::from_secs(2), async {
        while registry.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("relay never subscribed");

    cancel.cancel();

    let summary = timeout(Duration::from_secs(2), relay)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.bars_received, 0);

    handle.abort();
}
