//! CSV Tick Source
//!
//! Reads trade ticks from a comma-delimited file, groups consecutive ticks
//! with the same timestamp key into batches and releases them no faster than
//! one per tick interval.
//!
//! # File Format
//!
//! One header row, then rows of exactly six fields:
//!
//! ```text
//! <TICKER>,<PER>,<DATE>,<TIME>,<LAST>,<VOL>
//! SPFB.RTS,0,20190517,100000,127880.0,1
//! ```
//!
//! Only the ticker, time, last and volume columns are used. The decimal
//! separator is stripped from `LAST` before integer parsing. Quotes carry no
//! meaning and an empty line between records is a malformed row.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use csv::{ReaderBuilder, StringRecord, Trim};
use tokio::time::Instant;

use crate::application::ports::{FeedError, ParseErrorKind, TickFeed};
use crate::domain::market::{Batch, Tick};
use crate::infrastructure::config::FeedSettings;

const FIELD_COUNT: usize = 6;

// =============================================================================
// Options & Stats
// =============================================================================

/// Replay options of a tick source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayOptions {
    /// Minimum spacing between the starts of successive `next_batch` calls.
    pub tick_interval: Duration,
    /// Instruments to keep; empty keeps every instrument.
    pub instruments: Vec<String>,
}

impl ReplayOptions {
    /// Options with the given interval and no instrument filter.
    #[must_use]
    pub const fn new(tick_interval: Duration) -> Self {
        Self {
            tick_interval,
            instruments: Vec::new(),
        }
    }

    /// Restrict the replay to `instruments`.
    #[must_use]
    pub fn with_instruments(mut self, instruments: Vec<String>) -> Self {
        self.instruments = instruments;
        self
    }

    fn admits(&self, instrument: &str) -> bool {
        self.instruments.is_empty() || self.instruments.iter().any(|i| i == instrument)
    }
}

impl From<&FeedSettings> for ReplayOptions {
    fn from(settings: &FeedSettings) -> Self {
        Self::new(settings.tick_interval).with_instruments(settings.tickers.clone())
    }
}

/// Counters of a tick source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedStats {
    /// Rows parsed successfully.
    pub ticks_read: u64,
    /// Parsed rows skipped by the instrument filter.
    pub ticks_skipped: u64,
    /// Batches handed out.
    pub batches_emitted: u64,
}

// =============================================================================
// Source
// =============================================================================

/// Paced tick source over any reader of delimited text.
pub struct CsvTickSource<R> {
    reader: csv::Reader<R>,
    record: StringRecord,
    options: ReplayOptions,
    /// First tick of the next batch, read while closing the previous one.
    pending: Option<Tick>,
    last_started: Option<Instant>,
    /// Line of the last record read; the header is line 1.
    last_line: u64,
    done: bool,
    poisoned: bool,
    stats: FeedStats,
}

impl CsvTickSource<File> {
    /// Open the tick file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Io`] if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>, options: ReplayOptions) -> Result<Self, FeedError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        tracing::info!(
            path = %path.display(),
            tick_interval_ms = options.tick_interval.as_millis(),
            instruments = ?options.instruments,
            "Opened tick file"
        );
        Ok(Self::from_reader(file, options))
    }
}

impl<R: Read> CsvTickSource<R> {
    /// Wrap a reader. The first row is treated as a header and skipped.
    pub fn from_reader(reader: R, options: ReplayOptions) -> Self {
        let reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .quoting(false)
            .trim(Trim::All)
            .from_reader(reader);

        Self {
            reader,
            record: StringRecord::new(),
            options,
            pending: None,
            last_started: None,
            last_line: 1,
            done: false,
            poisoned: false,
            stats: FeedStats::default(),
        }
    }

    /// Counters so far.
    #[must_use]
    pub const fn stats(&self) -> FeedStats {
        self.stats
    }

    /// Whether the input has been exhausted.
    #[must_use]
    pub const fn is_done(&self) -> bool {
        self.done
    }

    async fn pace(&mut self) {
        if let Some(previous) = self.last_started {
            tokio::time::sleep_until(previous + self.options.tick_interval).await;
        }
        self.last_started = Some(Instant::now());
    }

    fn read_batch(&mut self) -> Result<Option<Batch>, FeedError> {
        let mut batch = self.pending.take().map(Batch::new);

        while let Some(tick) = self.read_tick()? {
            match batch.as_mut() {
                None => batch = Some(Batch::new(tick)),
                Some(current) => {
                    if let Err(next) = current.try_push(tick) {
                        self.pending = Some(next);
                        break;
                    }
                }
            }
        }

        if self.pending.is_none() {
            self.done = true;
        }
        if batch.is_some() {
            self.stats.batches_emitted += 1;
        }
        Ok(batch)
    }

    /// Next admitted tick, or `None` at end of input.
    fn read_tick(&mut self) -> Result<Option<Tick>, FeedError> {
        loop {
            let more = self
                .reader
                .read_record(&mut self.record)
                .map_err(into_feed_error)?;
            if !more {
                return Ok(None);
            }

            let line = self.record.position().map_or(0, csv::Position::line);
            // The reader skips empty lines; a gap in line numbers is one.
            if line > self.last_line + 1 {
                return Err(FeedError::Parse {
                    line: self.last_line + 1,
                    kind: ParseErrorKind::FieldCount {
                        expected: FIELD_COUNT,
                        found: 0,
                    },
                });
            }
            self.last_line = line;

            let tick =
                parse_record(&self.record).map_err(|kind| FeedError::Parse { line, kind })?;
            self.stats.ticks_read += 1;

            if self.options.admits(&tick.instrument) {
                return Ok(Some(tick));
            }
            self.stats.ticks_skipped += 1;
            tracing::trace!(instrument = %tick.instrument, line, "Skipped tick");
        }
    }
}

#[async_trait]
impl<R: Read + Send> TickFeed for CsvTickSource<R> {
    async fn next_batch(&mut self) -> Result<Option<Batch>, FeedError> {
        if self.poisoned {
            return Err(FeedError::Poisoned);
        }
        if self.done {
            return Ok(None);
        }

        self.pace().await;

        let result = self.read_batch();
        if let Err(e) = &result {
            self.poisoned = true;
            self.pending = None;
            tracing::error!(error = %e, "Tick source failed");
        }
        result
    }
}

// =============================================================================
// Parsing
// =============================================================================

/// Parse one already-trimmed row into a tick.
///
/// # Errors
///
/// Returns the reason the row is not a valid tick.
pub fn parse_record(record: &StringRecord) -> Result<Tick, ParseErrorKind> {
    if record.len() != FIELD_COUNT {
        return Err(ParseErrorKind::FieldCount {
            expected: FIELD_COUNT,
            found: record.len(),
        });
    }

    let timestamp = &record[3];
    let price = &record[4];
    let volume = &record[5];

    Ok(Tick {
        instrument: record[0].to_string(),
        timestamp_key: timestamp
            .parse()
            .map_err(|_| ParseErrorKind::Timestamp(timestamp.to_string()))?,
        price: price
            .replace('.', "")
            .parse()
            .map_err(|_| ParseErrorKind::Price(price.to_string()))?,
        volume: volume
            .parse()
            .map_err(|_| ParseErrorKind::Volume(volume.to_string()))?,
    })
}

fn into_feed_error(err: csv::Error) -> FeedError {
    let line = err.position().map_or(0, csv::Position::line);
    let message = err.to_string();
    match err.into_kind() {
        csv::ErrorKind::Io(e) => FeedError::Io(e),
        _ => FeedError::Parse {
            line,
            kind: ParseErrorKind::Malformed(message),
        },
    }
}

// =============================================================================
// Tests
// =============================================================================
