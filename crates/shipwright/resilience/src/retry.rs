//! Retry with exponential backoff, jitter and per-attempt timeouts.

use crate::config::RetryPolicy;
use crate::error::{AttemptFailure, RetryError};
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

type RetryPredicate<E> = Box<dyn Fn(&E) -> bool + Send + Sync>;
type RetryHook<E> = Box<dyn Fn(u32, &AttemptFailure<E>, Duration) + Send + Sync>;
type ExhaustedHook<E> = Box<dyn Fn(u32, &AttemptFailure<E>) + Send + Sync>;

impl RetryPolicy {
    /// Un-jittered delay before the retry that follows attempt `attempt`
    /// (0-based): `min(initial * multiplier^attempt, max)`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let initial = self.initial_delay_ms as f64;
        let max = self.max_delay_ms as f64;
        let exp = self.multiplier.max(1.0).powi(attempt.min(i32::MAX as u32) as i32);
        let ms = (initial * exp).min(max);
        if ms.is_finite() && ms > 0.0 {
            Duration::from_millis(ms as u64)
        } else if ms.is_finite() {
            Duration::ZERO
        } else {
            Duration::from_millis(self.max_delay_ms)
        }
    }

    /// [`base_delay`](Self::base_delay) with ±`jitter_factor` noise, capped at
    /// `max_delay_ms`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt).as_millis() as f64;
        let jitter = self.jitter_factor.clamp(0.0, 1.0);
        if jitter == 0.0 || base == 0.0 {
            return Duration::from_millis(base as u64);
        }
        let spread = base * jitter;
        let noisy = base + rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_millis(noisy.clamp(0.0, self.max_delay_ms as f64) as u64)
    }
}

/// Retry runner built from a [`RetryPolicy`].
///
/// ```ignore
/// let result = Retry::new(policy)
///     .retry_if(|e: &BusError| e.class().is_retryable())
///     .on_retry(|attempt, err, delay| warn!(attempt, %err, ?delay, "retrying"))
///     .run(|attempt| async move { publish(attempt).await })
///     .await;
/// ```
pub struct Retry<E> {
    policy: RetryPolicy,
    retry_if: Option<RetryPredicate<E>>,
    on_retry: Option<RetryHook<E>>,
    on_exhausted: Option<ExhaustedHook<E>>,
}

impl<E: fmt::Display> Retry<E> {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            retry_if: None,
            on_retry: None,
            on_exhausted: None,
        }
    }

    /// Only errors matching `pred` are retried; others abort at once.
    /// Timeouts are always retried.
    pub fn retry_if(mut self, pred: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.retry_if = Some(Box::new(pred));
        self
    }

    /// Called before sleeping with the 1-based attempt that failed.
    pub fn on_retry(
        mut self,
        hook: impl Fn(u32, &AttemptFailure<E>, Duration) + Send + Sync + 'static,
    ) -> Self {
        self.on_retry = Some(Box::new(hook));
        self
    }

    pub fn on_exhausted(
        mut self,
        hook: impl Fn(u32, &AttemptFailure<E>) + Send + Sync + 'static,
    ) -> Self {
        self.on_exhausted = Some(Box::new(hook));
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` until it succeeds, fails non-retryably, or attempts run out.
    /// `op` receives the 0-based attempt number.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let timeout = self.policy.per_attempt_timeout();
        let mut attempt = 0;

        loop {
            let outcome = match timeout {
                Some(limit) => match tokio::time::timeout(limit, op(attempt)).await {
                    Ok(result) => result.map_err(AttemptFailure::Error),
                    Err(_) => Err(AttemptFailure::TimedOut(limit)),
                },
                None => op(attempt).await.map_err(AttemptFailure::Error),
            };

            let failure = match outcome {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(attempts = attempt + 1, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(failure) => failure,
            };

            let done = attempt + 1;
            let failure = match failure {
                AttemptFailure::Error(error)
                    if self.retry_if.as_ref().is_some_and(|pred| !pred(&error)) =>
                {
                    return Err(RetryError::Aborted {
                        attempts: done,
                        error,
                    });
                }
                other => other,
            };

            if done >= max_attempts {
                warn!(attempts = done, error = %failure, "Retries exhausted");
                if let Some(hook) = &self.on_exhausted {
                    hook(done, &failure);
                }
                return Err(RetryError::Exhausted {
                    attempts: done,
                    last: failure,
                });
            }

            let delay = self.policy.delay_for(attempt);
            debug!(attempt = done, delay_ms = delay.as_millis() as u64, error = %failure, "Retrying");
            if let Some(hook) = &self.on_retry {
                hook(done, &failure, delay);
            }
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            attempt += 1;
        }
    }
}
