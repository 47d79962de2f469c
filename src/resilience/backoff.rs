//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

/// Calculate the uncapped-by-history delay before retry `attempt` (1-based).
///
/// `base × multiplier^(attempt-1)`, capped at `max`, plus up to `jitter × delay`
/// of random extra time, never exceeding `max`.
pub fn calculate_backoff(
    attempt: u32,
    base: Duration,
    max: Duration,
    multiplier: f64,
    jitter: f64,
) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exponent = (attempt - 1).min(64) as i32;
    let delay_secs = base.as_secs_f64() * multiplier.max(1.0).powi(exponent);
    let capped_secs = delay_secs.min(max.as_secs_f64());

    let jitter_secs = if jitter > 0.0 && capped_secs > 0.0 {
        rand::thread_rng().gen_range(0.0..capped_secs * jitter)
    } else {
        0.0
    };

    Duration::from_secs_f64((capped_secs + jitter_secs).min(max.as_secs_f64()))
}

/// Backoff state carried across the retries of one logical request.
///
/// Delays never decrease and never exceed `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    multiplier: f64,
    jitter: f64,
    attempt: u32,
    last: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, multiplier: f64, jitter: f64) -> Self {
        Self {
            base,
            max,
            multiplier,
            jitter,
            attempt: 0,
            last: Duration::ZERO,
        }
    }

    /// Delay before the next retry.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt += 1;
        let delay = calculate_backoff(self.attempt, self.base, self.max, self.multiplier, self.jitter)
            .max(self.last)
            .min(self.max);
        self.last = delay;
        delay
    }

    /// Retries handed out so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn last_delay(&self) -> Duration {
        self.last
    }
}
