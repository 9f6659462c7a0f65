//! Resilience error types

use shipwright_types::ErrorClass;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Why a single attempt failed.
#[derive(Debug)]
pub enum AttemptFailure<E> {
    Error(E),
    TimedOut(Duration),
}

impl<E> AttemptFailure<E> {
    /// The operation's own error, if it produced one.
    pub fn into_error(self) -> Option<E> {
        match self {
            AttemptFailure::Error(e) => Some(e),
            AttemptFailure::TimedOut(_) => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for AttemptFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptFailure::Error(e) => write!(f, "{}", e),
            AttemptFailure::TimedOut(after) => {
                write!(f, "attempt timed out after {}ms", after.as_millis())
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum RetryError<E: fmt::Display> {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: AttemptFailure<E>,
    },

    #[error("non-retryable failure on attempt {attempts}: {error}")]
    Aborted { attempts: u32, error: E },
}

impl<E: fmt::Display> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } | RetryError::Aborted { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            RetryError::Exhausted { .. } => ErrorClass::ExhaustedRetry,
            RetryError::Aborted { .. } => ErrorClass::BusinessFailure,
        }
    }
}

#[derive(Debug, Error)]
pub enum BreakerError<E: fmt::Display> {
    #[error("circuit '{name}' is open, retry in {}ms", .retry_after.as_millis())]
    Open { name: String, retry_after: Duration },

    #[error("{0}")]
    Inner(E),
}

impl<E: fmt::Display> BreakerError<E> {
    pub fn class(&self) -> ErrorClass {
        ErrorClass::Transient
    }

    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }
}
