//! Exchange Configuration Settings
//!
//! Configuration types for the exchange and the broker relay, loaded from
//! environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::domain::subscription::DEFAULT_SUBSCRIBER_CAPACITY;

/// Replay feed settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSettings {
    /// Tick file to replay.
    pub data_file: PathBuf,
    /// Minimum spacing between successive batches.
    pub tick_interval: Duration,
    /// Instruments to replay; empty admits every instrument.
    pub tickers: Vec<String>,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            data_file: PathBuf::from("./data/SPFB.RTS_190517_190517.csv"),
            tick_interval: Duration::from_secs(1),
            tickers: vec!["SPFB.RTS".to_string()],
        }
    }
}

/// Server settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// gRPC listen address.
    pub addr: SocketAddr,
    /// Health check HTTP port.
    pub health_port: u16,
    /// Bounded buffer capacity of each subscriber.
    pub subscriber_buffer: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            health_port: 8082,
            subscriber_buffer: DEFAULT_SUBSCRIBER_CAPACITY,
        }
    }
}

/// Complete exchange configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExchangeConfig {
    /// Server settings.
    pub server: ServerSettings,
    /// Replay feed settings.
    pub feed: FeedSettings,
}

impl ExchangeConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the listen address is not a valid socket address.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the listen address is not a valid socket address.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let addr = match lookup("EXCHANGE_ADDR") {
            Some(raw) => parse_listen_addr(&raw)?,
            None => defaults.server.addr,
        };

        let server = ServerSettings {
            addr,
            health_port: parse_or(&lookup, "EXCHANGE_HEALTH_PORT", defaults.server.health_port),
            subscriber_buffer: parse_or(
                &lookup,
                "EXCHANGE_SUBSCRIBER_BUFFER",
                defaults.server.subscriber_buffer,
            )
            .max(1),
        };

        let feed = FeedSettings {
            data_file: lookup("EXCHANGE_DATA_FILE")
                .filter(|v| !v.trim().is_empty())
                .map_or(defaults.feed.data_file, PathBuf::from),
            tick_interval: lookup("EXCHANGE_TICK_INTERVAL_MS")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map_or(defaults.feed.tick_interval, Duration::from_millis),
            tickers: lookup("EXCHANGE_TICKERS").map_or(defaults.feed.tickers, |v| split_list(&v)),
        };

        Ok(Self { server, feed })
    }
}

/// Broker relay reconnection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectSettings {
    /// Initial reconnection delay.
    pub delay_initial: Duration,
    /// Maximum reconnection delay.
    pub delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            delay_initial: Duration::from_millis(500),
            delay_max: Duration::from_secs(30),
            delay_multiplier: 2.0,
            max_attempts: 0,
        }
    }
}

/// Broker relay configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    /// Exchange endpoint URL.
    pub exchange_url: String,
    /// Broker id sent with the subscribe request.
    pub broker_id: i64,
    /// Reconnection settings.
    pub reconnect: ReconnectSettings,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            exchange_url: "http://127.0.0.1:8080".to_string(),
            broker_id: 1,
            reconnect: ReconnectSettings::default(),
        }
    }
}

impl RelayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange URL is set but empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange URL is set but empty.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let exchange_url = match lookup("BROKER_EXCHANGE_URL") {
            Some(url) if url.trim().is_empty() => {
                return Err(ConfigError::EmptyValue("BROKER_EXCHANGE_URL".to_string()));
            }
            Some(url) => url.trim().to_string(),
            None => defaults.exchange_url,
        };

        let reconnect = ReconnectSettings {
            delay_initial: lookup("BROKER_RECONNECT_DELAY_INITIAL_MS")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map_or(defaults.reconnect.delay_initial, Duration::from_millis),
            delay_max: lookup("BROKER_RECONNECT_DELAY_MAX_SECS")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map_or(defaults.reconnect.delay_max, Duration::from_secs),
            delay_multiplier: parse_or(
                &lookup,
                "BROKER_RECONNECT_DELAY_MULTIPLIER",
                defaults.reconnect.delay_multiplier,
            ),
            max_attempts: parse_or(
                &lookup,
                "BROKER_MAX_RECONNECT_ATTEMPTS",
                defaults.reconnect.max_attempts,
            ),
        };

        Ok(Self {
            exchange_url,
            broker_id: parse_or(&lookup, "BROKER_ID", defaults.broker_id),
            reconnect,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has an unusable value.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Rejected value.
        value: String,
    },
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

/// Accepts `host:port` or the Go-style `:port` shorthand.
fn parse_listen_addr(raw: &str) -> Result<SocketAddr, ConfigError> {
    let trimmed = raw.trim();
    let candidate = if trimmed.starts_with(':') {
        format!("0.0.0.0{trimmed}")
    } else {
        trimmed.to_string()
    };

    candidate
        .parse()
        .map_err(|_| ConfigError::InvalidValue {
            key: "EXCHANGE_ADDR".to_string(),
            value: raw.to_string(),
        })
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}
