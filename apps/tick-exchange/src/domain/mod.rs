//! Domain Layer - Core replay types and fan-out bookkeeping.
//!
//! Pure data types and the aggregation rule live in `market`; the
//! subscriber registry in `subscription` is the only shared mutable state
//! in the process.

/// Ticks, batches, bars and OHLCV aggregation.
pub mod market;

/// Subscriber registry with bounded per-subscriber buffers.
pub mod subscription;
