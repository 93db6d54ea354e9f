//! Bounded retry with backoff

use std::time::Duration;

/// How many times to try an operation and how long to wait in between
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first (at least 1)
    pub max_attempts: u32,
    /// Delay after the first failure
    pub initial_backoff: Duration,
    /// Upper bound for any single delay
    pub max_backoff: Duration,
    /// Growth factor per attempt (1.0 = fixed interval)
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no waiting
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Poll at a constant interval
    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff: interval,
            max_backoff: interval,
            multiplier: 1.0,
        }
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let delay = self.initial_backoff.as_nanos() as f64 * factor;
        let capped = delay.min(self.max_backoff.as_nanos() as f64).max(0.0);
        Duration::from_nanos(capped.round() as u64)
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// attempts are exhausted. Blocks the calling thread between attempts.
    ///
    /// On failure returns the number of attempts made with the last error.
    pub fn run<T, E>(
        &self,
        mut op: impl FnMut(u32) -> Result<T, E>,
        is_transient: impl Fn(&E) -> bool,
    ) -> Result<T, (u32, E)> {
        let max = self.attempts();
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) if attempt < max && is_transient(&err) => {
                    log::debug!("Attempt {}/{} failed, retrying", attempt, max);
                    std::thread::sleep(self.backoff_for(attempt));
                    attempt += 1;
                }
                Err(err) => return Err((attempt, err)),
            }
        }
    }
}
