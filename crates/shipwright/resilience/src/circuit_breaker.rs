//! Circuit breaker with a rolling failure window.
//!
//! Protects callers from a dependency that keeps failing:
//! - Closed: calls flow; outcomes are counted over the last `window_ms`
//! - Open: calls fail fast until `open_duration_ms` has passed
//! - HalfOpen: a few trial calls decide whether to close or reopen
//!
//! Time is read from the tokio clock so tests can pause and advance it.

use crate::config::CircuitBreakerConfig;
use crate::error::BreakerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Requests flow normally.
    Closed,

    /// Requests are rejected without being attempted.
    Open,

    /// Limited trial requests probe for recovery.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    /// (when, failed) for every outcome recorded while closed
    outcomes: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
    half_open_in_flight: u32,
    half_open_successes: u32,
    /// Bumped on every transition so a late trial outcome can tell it is stale
    generation: u64,
    rejected: u64,
    last_transition: DateTime<Utc>,
}

impl Inner {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&(at, _)) = self.outcomes.front() {
            if now.saturating_duration_since(at) > window {
                self.outcomes.pop_front();
            } else {
                break;
            }
        }
    }

    fn failures(&self) -> u32 {
        self.outcomes.iter().filter(|(_, failed)| *failed).count() as u32
    }
}

/// Circuit breaker guarding one named dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                outcomes: VecDeque::new(),
                opened_at: None,
                half_open_in_flight: 0,
                half_open_successes: 0,
                generation: 0,
                rejected: 0,
                last_transition: Utc::now(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // State stays consistent even if a holder panicked mid-update.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current state, applying the open → half-open timeout.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.check_timeout(&mut inner, Instant::now());
        inner.state
    }

    /// Ask to make a call. Counts a half-open trial slot when granted.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        self.admit().map(|_| ())
    }

    /// Admit a call, returning the generation of the half-open trial it
    /// occupies, if any.
    fn admit(&self) -> Result<Option<u64>, Duration> {
        let now = Instant::now();
        let mut inner = self.lock();
        self.check_timeout(&mut inner, now);

        match inner.state {
            CircuitState::Closed => Ok(None),
            CircuitState::Open => {
                inner.rejected += 1;
                let elapsed = inner
                    .opened_at
                    .map(|at| now.saturating_duration_since(at))
                    .unwrap_or_default();
                Err(self.config.open_duration().saturating_sub(elapsed))
            }
            CircuitState::HalfOpen => {
                if inner.half_open_in_flight < self.config.half_open_max_calls {
                    inner.half_open_in_flight += 1;
                    Ok(Some(inner.generation))
                } else {
                    inner.rejected += 1;
                    Err(Duration::ZERO)
                }
            }
        }
    }

    /// Whether a call would be admitted right now.
    pub fn allow_request(&self) -> bool {
        self.try_acquire().is_ok()
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let now = Instant::now();
        let mut inner = self.lock();

        match inner.state {
            CircuitState::Closed => {
                inner.outcomes.push_back((now, false));
                inner.prune(now, self.config.window());
            }
            CircuitState::HalfOpen => {
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.success_threshold {
                    info!(
                        breaker = %self.name,
                        successes = inner.half_open_successes,
                        "Circuit breaker closing after successful recovery"
                    );
                    self.transition_to(&mut inner, CircuitState::Closed, now);
                }
            }
            CircuitState::Open => {
                debug!(breaker = %self.name, "Success recorded while circuit open");
            }
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut inner = self.lock();

        match inner.state {
            CircuitState::Closed => {
                inner.outcomes.push_back((now, true));
                inner.prune(now, self.config.window());

                let failures = inner.failures();
                let samples = inner.outcomes.len() as u32;
                let rate = failures as f64 / samples.max(1) as f64;

                let by_count = failures >= self.config.failure_threshold;
                let by_rate = samples >= self.config.minimum_samples
                    && rate >= self.config.failure_rate_threshold;

                if by_count || by_rate {
                    warn!(
                        breaker = %self.name,
                        failures,
                        samples,
                        rate,
                        "Circuit breaker opening"
                    );
                    self.transition_to(&mut inner, CircuitState::Open, now);
                }
            }
            CircuitState::HalfOpen => {
                warn!(breaker = %self.name, "Circuit breaker re-opening after half-open failure");
                self.transition_to(&mut inner, CircuitState::Open, now);
            }
            CircuitState::Open => {}
        }
    }

    /// A half-open trial ended without an outcome, e.g. its future was
    /// dropped by a timeout. Treated as a failure unless the circuit has
    /// moved on since the trial was admitted.
    fn abandon_trial(&self, generation: u64) {
        let now = Instant::now();
        let mut inner = self.lock();
        if inner.state != CircuitState::HalfOpen || inner.generation != generation {
            return;
        }
        warn!(breaker = %self.name, "Circuit breaker re-opening after cancelled half-open trial");
        self.transition_to(&mut inner, CircuitState::Open, now);
    }

    /// Run `op` through the breaker. Dropping the returned future while a
    /// half-open trial is running counts as a failed trial.
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        E: fmt::Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let trial = match self.admit() {
            Ok(trial) => trial,
            Err(retry_after) => {
                return Err(BreakerError::Open {
                    name: self.name.clone(),
                    retry_after,
                })
            }
        };
        let mut guard = TrialGuard {
            breaker: self,
            trial,
        };
        let outcome = op().await;
        guard.trial = None;

        match outcome {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(BreakerError::Inner(e))
            }
        }
    }

    /// Force the circuit to a specific state.
    pub fn force_state(&self, new_state: CircuitState) {
        let mut inner = self.lock();
        info!(
            breaker = %self.name,
            old_state = %inner.state,
            new_state = %new_state,
            "Circuit breaker state forced"
        );
        self.transition_to(&mut inner, new_state, Instant::now());
    }

    pub fn reset(&self) {
        self.force_state(CircuitState::Closed);
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let now = Instant::now();
        let mut inner = self.lock();
        self.check_timeout(&mut inner, now);
        inner.prune(now, self.config.window());
        let opened_ago = inner.opened_at.map(|at| now.saturating_duration_since(at));
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failures_in_window: inner.failures(),
            samples_in_window: inner.outcomes.len() as u32,
            rejected: inner.rejected,
            opened_at: opened_ago
                .and_then(|ago| chrono::Duration::from_std(ago).ok())
                .map(|ago| Utc::now() - ago),
            last_transition: inner.last_transition,
        }
    }

    fn check_timeout(&self, inner: &mut Inner, now: Instant) {
        if inner.state != CircuitState::Open {
            return;
        }
        let Some(opened_at) = inner.opened_at else {
            return;
        };
        if now.saturating_duration_since(opened_at) >= self.config.open_duration() {
            info!(breaker = %self.name, "Circuit breaker half-open after timeout");
            self.transition_to(inner, CircuitState::HalfOpen, now);
        }
    }

    fn transition_to(&self, inner: &mut Inner, new_state: CircuitState, now: Instant) {
        inner.state = new_state;
        inner.generation = inner.generation.wrapping_add(1);
        inner.last_transition = Utc::now();
        inner.half_open_in_flight = 0;
        inner.half_open_successes = 0;

        match new_state {
            CircuitState::Closed => {
                inner.outcomes.clear();
                inner.opened_at = None;
            }
            CircuitState::Open => {
                inner.opened_at = Some(now);
            }
            CircuitState::HalfOpen => {}
        }
    }
}

/// Gives back an unfinished half-open trial slot when `call` is cancelled.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    trial: Option<u64>,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if let Some(generation) = self.trial.take() {
            self.breaker.abandon_trial(generation);
        }
    }
}

/// Point-in-time view of a breaker, shareable through the KV store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failures_in_window: u32,
    pub samples_in_window: u32,
    pub rejected: u64,
    pub opened_at: Option<DateTime<Utc>>,
    pub last_transition: DateTime<Utc>,
}
