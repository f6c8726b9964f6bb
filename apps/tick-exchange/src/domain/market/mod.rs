//! Market Data Types
//!
//! Core domain types for the replayed feed: raw ticks, same-timestamp
//! batches and the OHLCV bars aggregated from them.
//!
//! Prices are fixed-point integers. The source file's decimal separator is
//! stripped before parsing, so `1000.5` becomes `10005`; no scale is
//! tracked here.

// =============================================================================
// Tick
// =============================================================================

/// A single trade record from the tick file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tick {
    /// Instrument ticker (e.g. `SPFB.RTS`).
    pub instrument: String,
    /// Timestamp key. Ticks with equal keys are aggregated together.
    pub timestamp_key: i64,
    /// Fixed-point trade price.
    pub price: i64,
    /// Traded volume.
    pub volume: i32,
}

// =============================================================================
// Batch
// =============================================================================

/// A non-empty run of ticks sharing one timestamp key.
///
/// A batch is always created from its first tick, so an empty batch cannot
/// exist. Ticks with a different key are rejected by [`Batch::try_push`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    timestamp_key: i64,
    ticks: Vec<Tick>,
}

impl Batch {
    /// Start a batch with its first tick.
    #[must_use]
    pub fn new(first: Tick) -> Self {
        Self {
            timestamp_key: first.timestamp_key,
            ticks: vec![first],
        }
    }

    /// Append a tick with the same timestamp key.
    ///
    /// # Errors
    ///
    /// Returns the tick unchanged if its key differs from the batch key.
    /// The caller uses it as the seed of the next batch.
    pub fn try_push(&mut self, tick: Tick) -> Result<(), Tick> {
        if tick.timestamp_key != self.timestamp_key {
            return Err(tick);
        }
        self.ticks.push(tick);
        Ok(())
    }

    /// The timestamp key shared by every tick.
    #[must_use]
    pub const fn timestamp_key(&self) -> i64 {
        self.timestamp_key
    }

    /// Ticks in arrival order.
    #[must_use]
    pub fn ticks(&self) -> &[Tick] {
        &self.ticks
    }

    /// Number of ticks (always at least 1).
    #[must_use]
    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    /// Always `false`; provided for API symmetry with `len`.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// First tick of the batch.
    #[must_use]
    pub fn first(&self) -> &Tick {
        &self.ticks[0]
    }

    /// Last tick of the batch.
    #[must_use]
    pub fn last(&self) -> &Tick {
        &self.ticks[self.ticks.len() - 1]
    }

    /// Consume the batch, returning its ticks.
    #[must_use]
    pub fn into_ticks(self) -> Vec<Tick> {
        self.ticks
    }
}

// =============================================================================
// Bar
// =============================================================================

/// OHLCV summary of one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bar {
    /// Instrument of the first tick in the batch.
    pub instrument: String,
    /// Timestamp key of the batch.
    pub timestamp_key: i64,
    /// Price of the first tick.
    pub open: i64,
    /// Highest price.
    pub high: i64,
    /// Lowest price.
    pub low: i64,
    /// Price of the last tick.
    pub close: i64,
    /// Sum of tick volumes, saturating at `i32::MAX`.
    pub volume: i32,
}

/// Aggregate a batch into a single OHLCV bar.
///
/// Pure and deterministic. `open` and `close` are the first and last tick
/// prices, `high`/`low` the extremes over the whole batch.
#[must_use]
pub fn aggregate(batch: &Batch) -> Bar {
    let first = batch.first();
    let mut high = first.price;
    let mut low = first.price;
    let mut volume: i32 = 0;

    for tick in batch.ticks() {
        high = high.max(tick.price);
        low = low.min(tick.price);
        volume = volume.saturating_add(tick.volume);
    }

    Bar {
        instrument: first.instrument.clone(),
        timestamp_key: batch.timestamp_key(),
        open: first.price,
        high,
        low,
        close: batch.last().price,
        volume,
    }
}

// =============================================================================
// Tests
// =============================================================================
