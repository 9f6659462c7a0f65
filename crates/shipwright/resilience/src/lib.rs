//! Retry and circuit breaking
//!
//! - [`Retry`] re-runs a fallible async operation with exponential backoff,
//!   jitter and an optional per-attempt timeout
//! - [`CircuitBreaker`] fails fast while a dependency keeps failing and
//!   probes for recovery with a few trial calls
//! - [`BreakerRegistry`] shares named breakers and publishes their state to
//!   the KV store

#![deny(unsafe_code)]

pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod registry;
pub mod retry;

pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitState};
pub use config::{CircuitBreakerConfig, RetryPolicy};
pub use error::{AttemptFailure, BreakerError, RetryError};
pub use registry::BreakerRegistry;
pub use retry::Retry;
