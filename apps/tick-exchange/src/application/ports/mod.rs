//! Port Interfaces
//!
//! Defines the interfaces (ports) between the replay pipeline and the
//! outside world, following the Hexagonal Architecture pattern. These are
//! the contracts that infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `TickFeed`: ordered source of same-timestamp batches
//! - `BarWriter`: outbound connection of one subscriber

use async_trait::async_trait;

use crate::domain::market::{Bar, Batch};

// =============================================================================
// Tick Feed
// =============================================================================

/// Reason a tick record could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseErrorKind {
    /// Row does not have the expected number of fields.
    #[error("expected {expected} fields, found {found}")]
    FieldCount {
        /// Required field count.
        expected: usize,
        /// Field count of the row.
        found: usize,
    },
    /// Timestamp field is not an integer.
    #[error("invalid timestamp {0:?}")]
    Timestamp(String),
    /// Price field is not a number.
    #[error("invalid price {0:?}")]
    Price(String),
    /// Volume field is not an integer.
    #[error("invalid volume {0:?}")]
    Volume(String),
    /// Row could not be decoded as delimited text.
    #[error("undecodable row: {0}")]
    Malformed(String),
}

/// Tick feed errors. All of them are fatal to the replay.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// Underlying reader failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A record is malformed.
    #[error("malformed record at line {line}: {kind}")]
    Parse {
        /// 1-based line number in the source file.
        line: u64,
        /// What was wrong with the record.
        kind: ParseErrorKind,
    },

    /// The feed already failed and will not produce more batches.
    #[error("tick feed stopped after an earlier error")]
    Poisoned,
}

/// Ordered source of tick batches, paced to real time.
///
/// `Ok(None)` marks the normal end of input.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TickFeed: Send {
    /// Produce the next batch of same-timestamp ticks.
    ///
    /// # Errors
    ///
    /// Returns a [`FeedError`] if the input is unreadable or malformed.
    async fn next_batch(&mut self) -> Result<Option<Batch>, FeedError>;
}

// =============================================================================
// Bar Writer
// =============================================================================

/// Subscriber-side stream errors. Local to one subscriber.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// Writing to the subscriber's connection failed.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Outbound connection of a single subscriber.
#[async_trait]
pub trait BarWriter: Send {
    /// Write one bar to the peer.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Transport`] when the peer can no longer be
    /// written to.
    async fn write(&mut self, bar: Bar) -> Result<(), StreamError>;
}
