// SPDX-License-Identifier: AGPL-3.0
//! Three-state fault isolation primitive.
//!
//! Mirrors the `CircuitBreaker` class in the adapter layer this crate
//! replaces: `CLOSED -> OPEN` after `failure_threshold` consecutive
//! failures, `OPEN -> HALF_OPEN` after `recovery_timeout` has elapsed, and
//! `HALF_OPEN -> CLOSED` after `success_threshold_to_close` consecutive
//! probe successes. State transitions are serialized by a single mutex;
//! counters are plain `u32`s guarded by the same lock, which is cheap
//! enough at breaker granularity (one per adapter instance).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub half_open_max_concurrent: u32,
    pub success_threshold_to_close: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_concurrent: 1,
            success_threshold_to_close: 2,
        }
    }
}

#[derive(Debug, Error)]
#[error("circuit breaker '{name}' is open")]
pub struct CircuitOpenError {
    pub name: String,
}

struct Inner {
    state: CircuitState,
    failure_count: u32,
    consecutive_successes: u32,
    last_failure_at: Option<Instant>,
    half_open_in_flight: u32,
    state_changes: u64,
}

/// Metrics snapshot exposed to callers (`state, failure_rate, total_calls, state_changes`).
#[derive(Debug, Clone)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    pub failure_rate: f64,
    pub total_calls: u64,
    pub state_changes: u64,
}

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    total_calls: AtomicU64,
    total_failures: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                consecutive_successes: 0,
                last_failure_at: None,
                half_open_in_flight: 0,
                state_changes: 0,
            }),
            total_calls: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Guard a fallible async operation with the breaker's state machine.
    ///
    /// Returns `Err(CircuitOpenError)` without invoking `f` when the
    /// breaker is open (or half-open at its concurrency cap). Otherwise
    /// runs `f` and routes the outcome into `on_success`/`on_failure`.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<Result<T, E>, CircuitOpenError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        self.try_acquire()?;
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        let outcome = f().await;
        match &outcome {
            Ok(_) => self.on_success(),
            Err(_) => {
                self.total_failures.fetch_add(1, Ordering::Relaxed);
                self.on_failure();
            }
        }
        Ok(outcome)
    }

    fn try_acquire(&self) -> Result<(), CircuitOpenError> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.config.recovery_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_in_flight = 0;
                    inner.consecutive_successes = 0;
                    inner.state_changes += 1;
                } else {
                    return Err(CircuitOpenError {
                        name: self.name.clone(),
                    });
                }
            }
            _ => {}
        }

        match inner.state {
            CircuitState::HalfOpen => {
                if inner.half_open_in_flight >= self.config.half_open_max_concurrent {
                    return Err(CircuitOpenError {
                        name: self.name.clone(),
                    });
                }
                inner.half_open_in_flight += 1;
            }
            CircuitState::Open => unreachable!("handled above"),
            CircuitState::Closed => {}
        }
        Ok(())
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold_to_close {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.consecutive_successes = 0;
                    inner.state_changes += 1;
                }
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock();
        inner.last_failure_at = Some(Instant::now());
        inner.failure_count += 1;
        match inner.state {
            CircuitState::HalfOpen => {
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                inner.state = CircuitState::Open;
                inner.consecutive_successes = 0;
                inner.state_changes += 1;
            }
            CircuitState::Closed => {
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.state_changes += 1;
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.lock();
        let total = self.total_calls.load(Ordering::Relaxed);
        let failures = self.total_failures.load(Ordering::Relaxed);
        CircuitBreakerMetrics {
            state: inner.state,
            failure_rate: if total == 0 {
                0.0
            } else {
                failures as f64 / total as f64
            },
            total_calls: total,
            state_changes: inner.state_changes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_millis(20),
            half_open_max_concurrent: 1,
            success_threshold_to_close: 2,
        }
    }

    #[tokio::test]
    async fn opens_after_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::new("test", cfg());
        for _ in 0..3 {
            let _ = breaker.call(|| async { Err::<(), _>("boom") }).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let result = breaker.call(|| async { Ok::<_, &str>(()) }).await;
        assert!(result.is_err(), "next call must fail fast without invoking f");
    }

    #[tokio::test]
    async fn half_open_closes_after_success_threshold() {
        let breaker = CircuitBreaker::new("test", cfg());
        for _ in 0..3 {
            let _ = breaker.call(|| async { Err::<(), _>("boom") }).await;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;

        let _ = breaker.call(|| async { Ok::<_, &str>(()) }).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let _ = breaker.call(|| async { Ok::<_, &str>(()) }).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("test", cfg());
        for _ in 0..3 {
            let _ = breaker.call(|| async { Err::<(), _>("boom") }).await;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;

        let _ = breaker
            .call(|| async { Err::<(), _>("still failing") })
            .await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }
}
