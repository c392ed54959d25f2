//! Bounded retries for calls to cluster peers
//!
//! Registration with the coordinator is the only awaited call retried in
//! place. Every other peer call is fire-and-forget and waits for the next
//! periodic cycle instead.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Doubling backoff with a ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Attempts after the first one
    pub retries: u32,

    /// Pause before the first retry
    pub initial: Duration,

    /// Longest pause between two attempts
    pub ceiling: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            retries: 3,
            initial: Duration::from_millis(500),
            ceiling: Duration::from_secs(5),
        }
    }
}

impl Backoff {
    pub fn new(retries: u32, initial: Duration, ceiling: Duration) -> Self {
        Self {
            retries,
            initial,
            ceiling,
        }
    }

    /// Pause before attempt number `attempt` (0 is the first try)
    pub fn pause_before(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.initial
            .checked_mul(factor)
            .unwrap_or(self.ceiling)
            .min(self.ceiling)
    }
}

/// Run `call` until it succeeds or the backoff's retries are spent
///
/// `what` names the call in log lines. Returns the last error on failure.
pub async fn retry<T, E, F, Fut>(backoff: &Backoff, what: &str, mut call: F) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;

    loop {
        let pause = backoff.pause_before(attempt);
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }

        match call().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(call = what, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if attempt >= backoff.retries => {
                tracing::warn!(call = what, attempts = attempt + 1, error = %e, "Giving up");
                return Err(e);
            }
            Err(e) => {
                tracing::debug!(
                    call = what,
                    attempt,
                    next_pause_ms = backoff.pause_before(attempt + 1).as_millis() as u64,
                    error = %e,
                    "Attempt failed"
                );
            }
        }

        attempt += 1;
    }
}
