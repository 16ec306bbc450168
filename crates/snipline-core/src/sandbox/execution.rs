//! Execution controls: retry with exponential backoff and a per-engine
//! circuit breaker around a sandbox call.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::error::{SandboxError, SandboxResult};
use crate::metrics::METRICS;

/// Retry and breaker settings for infrastructure failures.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retries (0 = run once).
    pub max_retries: u32,
    /// Base delay for exponential backoff between retries (milliseconds).
    pub backoff_base_ms: u64,
    /// Consecutive failures that open an engine's breaker.
    pub breaker_threshold: u32,
    /// How long an open breaker fails fast before letting one trial call through.
    pub breaker_cooldown_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_base_ms: 200,
            breaker_threshold: 5,
            breaker_cooldown_ms: 30_000,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }
}

/// Circuit breaker that opens after N consecutive failures.
///
/// Resets on success. Once open it fails fast until the cooldown has
/// elapsed, then lets calls through again (half-open); another failure
/// re-opens it.
#[derive(Debug)]
pub struct CircuitBreaker {
    consecutive_failures: AtomicU32,
    threshold: u32,
    cooldown: Duration,
    opened_at: Mutex<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            consecutive_failures: AtomicU32::new(0),
            threshold,
            cooldown,
            opened_at: Mutex::new(None),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.breaker_threshold,
            Duration::from_millis(config.breaker_cooldown_ms),
        )
    }

    fn opened_at(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        self.opened_at.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns `true` while the breaker is failing fast.
    pub fn is_open(&self) -> bool {
        if self.threshold == 0 || self.failure_count() < self.threshold {
            return false;
        }
        match *self.opened_at() {
            Some(at) => at.elapsed() < self.cooldown,
            None => true,
        }
    }

    /// Record a failure. Returns current consecutive failure count.
    pub fn record_failure(&self) -> u32 {
        let count = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if self.threshold > 0 && count >= self.threshold {
            *self.opened_at() = Some(Instant::now());
        }
        count
    }

    /// Reset on success.
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        *self.opened_at() = None;
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}

/// Run `op` with retry and circuit-breaker controls.
///
/// Only retryable `SandboxError`s are retried; the breaker is checked
/// before each attempt and updated after. Returns the value and the number
/// of attempts made.
pub async fn execute_with_controls<T, F, Fut>(
    engine_code: &str,
    config: &RetryConfig,
    breaker: &CircuitBreaker,
    op: F,
) -> SandboxResult<(T, u32)>
where
    F: Fn() -> Fut,
    Fut: Future<Output = SandboxResult<T>>,
{
    let max_attempts = config.max_retries + 1;
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        if breaker.is_open() {
            return Err(SandboxError::CircuitBreakerOpen {
                engine: engine_code.to_string(),
                consecutive_failures: breaker.failure_count(),
                threshold: breaker.threshold(),
            });
        }

        match op().await {
            Ok(value) => {
                breaker.record_success();
                return Ok((value, attempt));
            }
            Err(err) => {
                breaker.record_failure();
                if !err.is_retryable() {
                    return Err(err);
                }
                if attempt < max_attempts {
                    let delay = config.backoff(attempt);
                    warn!(
                        engine = engine_code,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "infrastructure failure, retrying"
                    );
                    METRICS.inc_infra_retries();
                    tokio::time::sleep(delay).await;
                }
                last_error = Some(err);
            }
        }
    }

    Err(SandboxError::ExecutionFailed {
        attempts: max_attempts,
        reason: last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "exhausted all attempts".into()),
    })
}
