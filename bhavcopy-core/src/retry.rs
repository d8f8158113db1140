//! Bounded retry with exponential backoff.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Retry parameters: attempt bound and backoff schedule.
///
/// Delay before attempt `n` (1-based, n ≥ 2) is
/// `min(base_delay_ms * 2^(n-2), max_delay_ms)` plus up to `jitter_ms`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            jitter_ms: 250,
        }
    }
}

/// Final result of a retried operation plus how many attempts were made.
#[derive(Debug)]
pub struct Retried<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

impl RetryPolicy {
    /// Policy with no sleeping between attempts (tests, dry runs).
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter_ms: 0,
        }
    }

    /// Backoff before the given attempt number (1-based). Zero for the first.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = (attempt - 2).min(20);
        let base = self
            .base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms);
        let jitter = if self.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        } else {
            0
        };
        Duration::from_millis(base.saturating_add(jitter))
    }

    /// Run `op` until it succeeds, returns a non-retryable error, or the
    /// attempt bound is reached. `op` receives the 1-based attempt number.
    pub fn run<T, E, F, P>(&self, is_retryable: P, mut op: F) -> Retried<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let max = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let delay = self.delay_before(attempt);
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }

            match op(attempt) {
                Ok(v) => {
                    return Retried {
                        result: Ok(v),
                        attempts: attempt,
                    }
                }
                Err(e) if attempt < max && is_retryable(&e) => {
                    debug!(attempt, max, error = %e, "retryable failure, backing off");
                    attempt += 1;
                }
                Err(e) => {
                    return Retried {
                        result: Err(e),
                        attempts: attempt,
                    }
                }
            }
        }
    }
}
