//! Reconnection Backoff
//!
//! Exponential backoff with jitter between broker relay connection attempts.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::ReconnectSettings;

/// Jitter applied to every delay, as a fraction of the delay.
const JITTER_FACTOR: f64 = 0.1;

/// Exponential backoff with jitter.
///
/// # Example
///
/// ```rust
/// use tick_exchange::infrastructure::config::ReconnectSettings;
/// use tick_exchange::infrastructure::relay::Backoff;
///
/// let mut backoff = Backoff::new(&ReconnectSettings::default());
/// assert!(backoff.next_delay().is_some());
///
/// // After a successful connection
/// backoff.reset();
/// assert_eq!(backoff.attempts(), 0);
/// ```
#[derive(Debug)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    jitter: f64,
    max_attempts: u32,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    /// Create a backoff from relay settings.
    #[must_use]
    pub const fn new(settings: &ReconnectSettings) -> Self {
        Self {
            initial: settings.delay_initial,
            max: settings.delay_max,
            multiplier: settings.delay_multiplier,
            jitter: JITTER_FACTOR,
            max_attempts: settings.max_attempts,
            current: settings.delay_initial,
            attempts: 0,
        }
    }

    /// Disable jitter, making delays deterministic.
    #[must_use]
    pub const fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.max_attempts > 0 && self.attempts >= self.max_attempts {
            return None;
        }
        self.attempts += 1;

        let delay = self.jittered(self.current);
        let scaled = self.current.as_secs_f64() * self.multiplier.max(1.0);
        self.current = Duration::try_from_secs_f64(scaled).map_or(self.max, |d| d.min(self.max));
        Some(delay)
    }

    /// Forget previous failures after a successful connection.
    pub const fn reset(&mut self) {
        self.current = self.initial;
        self.attempts = 0;
    }

    /// Failed attempts since the last reset.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return delay;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_ms = delay.as_millis() as f64;
        let spread = base_ms * self.jitter;
        let offset: f64 = rand::rng().random_range(-spread..=spread);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let millis = (base_ms + offset).max(1.0) as u64;
        Duration::from_millis(millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(
        initial_ms: u64,
        max_ms: u64,
        multiplier: f64,
        max_attempts: u32,
    ) -> ReconnectSettings {
        ReconnectSettings {
            delay_initial: Duration::from_millis(initial_ms),
            delay_max: Duration::from_millis(max_ms),
            delay_multiplier: multiplier,
            max_attempts,
        }
    }

    #[test]
    fn delays_grow_exponentially_up_to_cap() {
        let mut backoff = Backoff::new(&settings(100, 500, 2.0, 0)).without_jitter();

        let delays: Vec<_> = (0..5).map(|_| backoff.next_delay().unwrap()).collect();

        assert_eq!(
            delays,
            [100, 200, 400, 500, 500].map(Duration::from_millis).to_vec()
        );
    }

    #[test]
    fn attempts_are_bounded() {
        let mut backoff = Backoff::new(&settings(100, 1000, 2.0, 2)).without_jitter();

        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
        assert_eq!(backoff.attempts(), 2);
    }

    #[test]
    fn reset_restores_initial_delay() {
        let mut backoff = Backoff::new(&settings(100, 1000, 2.0, 2)).without_jitter();
        let _ = backoff.next_delay();
        let _ = backoff.next_delay();

        backoff.reset();

        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        for _ in 0..100 {
            let mut backoff = Backoff::new(&settings(1000, 10_000, 2.0, 0));
            let millis = backoff.next_delay().unwrap().as_millis();
            assert!((900..=1100).contains(&millis), "delay {millis}ms out of range");
        }
    }
}
