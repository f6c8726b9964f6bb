//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// CSV tick file adapter for the `TickFeed` port.
pub mod feed;

/// gRPC exchange server implementation.
pub mod grpc;

/// Broker relay client with reconnection backoff.
pub mod relay;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OpenTelemetry tracing integration.
pub mod telemetry;
