#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::cast_possible_wrap,
        clippy::cast_possible_truncation,
        clippy::items_after_statements
    )
)]

//! Tick Exchange - Historical Tick Replay and OHLCV Fan-out
//!
//! Replays a recorded tick file at a steady cadence, aggregates ticks sharing
//! a timestamp into OHLCV bars and streams every bar to all connected brokers
//! over a server-streaming gRPC call.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core replay types and fan-out bookkeeping
//!   - `market`: Ticks, batches, bars and aggregation
//!   - `subscription`: Subscriber registry with bounded buffers
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: `TickFeed` and `BarWriter` interfaces
//!   - `services`: Replay producer, per-subscriber stream endpoint
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `feed`: CSV tick file source
//!   - `grpc`: gRPC exchange server
//!   - `relay`: Broker relay client
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//!                 ┌──────────────┐     ┌────────────┐     ┌───────────┐
//! tick file ─────►│ CsvTickSource│────►│ aggregate  │────►│ Subscriber│──► Broker 1
//!   (paced)       │   batches    │     │  (1 bar)   │     │ Registry  │──► Broker 2
//!                 └──────────────┘     └────────────┘     └───────────┘──► Broker N
//! ```
//!
//! A subscriber whose buffer is full loses that bar; the producer never
//! waits on a slow broker.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core replay types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::market::{Bar, Batch, Tick, aggregate};
pub use domain::subscription::{
    BroadcastOutcome, DEFAULT_SUBSCRIBER_CAPACITY, RegistryError, RegistryStats, SharedRegistry,
    SubscriberId, SubscriberRegistry, Subscription,
};

// Ports and services
pub use application::ports::{BarWriter, FeedError, ParseErrorKind, StreamError, TickFeed};
pub use application::services::{
    BroadcastService, FeedState, ReplayPhase, ReplaySummary, StreamEndpoint, StreamExit,
};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, ExchangeConfig, FeedSettings, ReconnectSettings, RelayConfig, ServerSettings,
};

// Tick source
pub use infrastructure::feed::{CsvTickSource, FeedStats, ReplayOptions};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// gRPC server (for integration tests)
pub use infrastructure::grpc::{
    proto::exchange::v1 as proto,
    server::{ExchangeServer, ExchangeServerConfig},
};

// Broker relay
pub use infrastructure::relay::{BrokerRelay, RelayError, RelaySummary};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
