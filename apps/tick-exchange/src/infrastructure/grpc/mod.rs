//! gRPC Exchange Server
//!
//! Implements the `ExchangeService` gRPC service that streams aggregated
//! bars to brokers.
//!
//! # Architecture
//!
//! Each `Statistic` call:
//!
//! 1. Registers a subscriber with the `SubscriberRegistry`
//! 2. Spawns a `StreamEndpoint` task draining the subscriber's buffer
//! 3. Numbers and converts bars onto the response stream
//! 4. Unsubscribes on disconnect, shutdown or end of replay

pub mod server;

// Allow clippy warnings and missing docs in generated code
#[allow(
    missing_docs,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::unwrap_used,
    clippy::expect_used
)]
pub mod proto {
    pub mod exchange {
        pub mod v1 {
            include!(concat!(env!("OUT_DIR"), "/exchange.v1.rs"));
        }
    }
}

pub use server::{ExchangeServer, ExchangeServerConfig, GrpcBarWriter};
