//! Bounded retry with exponential backoff.

use std::fmt::Display;
use std::time::Duration;

/// Retries an operation up to `max_attempts` times.
///
/// After failed attempt `a` (0-based) the caller's thread sleeps
/// `base_delay * 2^a`, except after the final attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// The last error once every attempt has failed.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Backoff after failed attempt `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Runs `op` until it succeeds or attempts run out.
    ///
    /// `op` receives the 0-based attempt number. At least one attempt is
    /// always made.
    pub fn run<T, E, F>(&self, mut op: F) -> Result<T, RetryExhausted<E>>
    where
        E: Display,
        F: FnMut(u32) -> Result<T, E>,
    {
        self.run_with_sleep(&mut op, std::thread::sleep)
    }

    pub(crate) fn run_with_sleep<T, E, F, S>(
        &self,
        op: &mut F,
        mut sleep: S,
    ) -> Result<T, RetryExhausted<E>>
    where
        E: Display,
        F: FnMut(u32) -> Result<T, E>,
        S: FnMut(Duration),
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(error) if attempt + 1 >= attempts => {
                    tracing::error!(attempts, %error, "all attempts failed");
                    return Err(RetryExhausted {
                        attempts,
                        last_error: error,
                    });
                }
                Err(error) => {
                    let wait = self.delay_for(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        %error,
                        wait_ms = wait.as_millis() as u64,
                        "attempt failed, retrying"
                    );
                    sleep(wait);
                    attempt += 1;
                }
            }
        }
    }
}
