//! Resilience configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy with exponential backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Fraction of the base delay added or removed at random (0.0..=1.0).
    pub jitter_factor: f64,
    /// Bound on each individual attempt. `None` means unbounded.
    pub per_attempt_timeout_ms: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
            multiplier: 2.0,
            jitter_factor: 0.1,
            per_attempt_timeout_ms: None,
        }
    }
}

impl RetryPolicy {
    /// Retry immediately, without delay. Useful in tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            jitter_factor: 0.0,
            ..Self::default()
        }
    }

    pub fn per_attempt_timeout(&self) -> Option<Duration> {
        self.per_attempt_timeout_ms.map(Duration::from_millis)
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures inside the window that open the circuit.
    pub failure_threshold: u32,

    /// Failure ratio (0.0..=1.0) that opens the circuit once
    /// `minimum_samples` outcomes are in the window.
    pub failure_rate_threshold: f64,

    pub minimum_samples: u32,

    /// Rolling window length.
    pub window_ms: u64,

    /// Time spent open before trial calls are admitted.
    pub open_duration_ms: u64,

    /// Concurrent trial calls admitted while half-open.
    pub half_open_max_calls: u32,

    /// Consecutive half-open successes that close the circuit.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_rate_threshold: 0.5,
            minimum_samples: 10,
            window_ms: 60_000,
            open_duration_ms: 30_000,
            half_open_max_calls: 3,
            success_threshold: 2,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn open_duration(&self) -> Duration {
        Duration::from_millis(self.open_duration_ms)
    }
}
