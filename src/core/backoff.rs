//! Delay policies for reconnecting and retrying.
//!
//! - `Backoff`: the listener's open-ended reconnect delay. Doubles on every
//!   disconnect up to a ceiling and resets on a successful connect.
//! - `RetryPolicy`: bounded retries for a single request (used by the
//!   HTTP responder).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Floor for the reconnect delay; a zero base would never grow
pub const MIN_BACKOFF: Duration = Duration::from_secs(1);

/// Exponential reconnect backoff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    current: Duration,
    base: Duration,
    max: Duration,
}

impl Backoff {
    /// Create a backoff starting at `base`. `base` is raised to `MIN_BACKOFF`
    /// and a `max` below `base` is raised to `base`.
    pub fn new(base: Duration, max: Duration) -> Self {
        let base = base.max(MIN_BACKOFF);
        Self {
            current: base,
            base,
            max: max.max(base),
        }
    }

    /// Delay that the next disconnect will wait
    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Back to the base delay (successful connect)
    pub fn reset(&mut self) {
        self.current = self.base;
    }

    /// Take the delay for this disconnect and double the next one, capped at max
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }
}

/// Retry policy for one request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each retry)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay() -> u64 {
    4000
}
fn default_max_delay() -> u64 {
    10000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Calculate delay after a failed attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms.min(self.max_delay_ms));
        }

        let delay = self.initial_delay_ms as f64
            * self.backoff_multiplier.powi((attempt - 1) as i32);

        let capped = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
