//! Error classification shared across the workspace.
//!
//! Each crate owns its own error enum; this taxonomy is what those errors
//! map to and what a failed workflow exposes to operators.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Malformed or non-compliant envelope/result. Never auto-retried.
    Protocol,
    /// Network, timeout, rate limit. Retry-eligible with backoff.
    Transient,
    /// The agent legitimately failed its task.
    BusinessFailure,
    /// Retries ran out.
    ExhaustedRetry,
    /// A state-machine guard rejected a transition (stale or duplicate).
    GuardRejection,
}

impl ErrorClass {
    /// Whether a message failing with this class should be redelivered.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Protocol => "protocol",
            Self::Transient => "transient",
            Self::BusinessFailure => "business_failure",
            Self::ExhaustedRetry => "exhausted_retry",
            Self::GuardRejection => "guard_rejection",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
