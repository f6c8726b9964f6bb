//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for the tick feed and subscriber connections.
pub mod ports;

/// Application services for replay production and stream delivery.
pub mod services;
