// SPDX-License-Identifier: AGPL-3.0
//! Exponential-backoff retry with jitter and a caller-supplied
//! retryable-classifier. HTTP adapters layer `5xx`-is-retryable,
//! `4xx`-is-terminal on top of whatever classifier they pass in.

use std::time::Duration;

use rand_core::RngCore;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jitter {
    None,
    Full,
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub jitter: Jitter,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            exponential_base: 2.0,
            jitter: Jitter::Full,
        }
    }
}

impl RetryConfig {
    /// Delay before attempt `n` (0-indexed retry count, not counting the
    /// first try), before jitter is applied.
    pub fn base_delay_for_attempt(&self, n: u32) -> Duration {
        let scaled = self.initial_delay.as_secs_f64() * self.exponential_base.powi(n as i32);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }

    fn delay_for_attempt(&self, n: u32) -> Duration {
        let base = self.base_delay_for_attempt(n);
        match self.jitter {
            Jitter::None => base,
            Jitter::Full => {
                let mut rng = rand_core::OsRng;
                let frac = (rng.next_u32() as f64) / (u32::MAX as f64);
                Duration::from_secs_f64(base.as_secs_f64() * frac)
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("cancelled")]
    Cancelled,
    #[error("retry exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
}

/// Run `f` up to `config.max_attempts` times. `is_retryable` decides
/// whether a given error continues the loop; non-retryable errors
/// propagate immediately without sleeping.
pub async fn run_with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    is_retryable: impl Fn(&E) -> bool,
    mut f: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if attempt >= config.max_attempts || !is_retryable(&e) {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: e,
                    });
                }
                let delay = config.delay_for_attempt(attempt - 1);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => continue,
                    _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn exhausts_after_max_attempts() {
        let config = RetryConfig {
            max_attempts: 4,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            exponential_base: 2.0,
            jitter: Jitter::None,
        };
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = run_with_retry(
            &config,
            &cancel,
            |_: &&str| true,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("boom") }
            },
        )
        .await;

        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 4, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn non_retryable_stops_immediately() {
        let config = RetryConfig::default();
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = run_with_retry(
            &config,
            &cancel,
            |_: &&str| false,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("terminal") }
            },
        )
        .await;

        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 1, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delay_grows_exponentially_and_clamps() {
        let config = RetryConfig {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            exponential_base: 2.0,
            jitter: Jitter::None,
        };
        assert_eq!(config.base_delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.base_delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.base_delay_for_attempt(2), Duration::from_millis(300));
        assert_eq!(config.base_delay_for_attempt(3), Duration::from_millis(300));
    }
}
