//! KV error types

use shipwright_types::ErrorClass;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("value at '{key}' is not an integer: {value}")]
    NotAnInteger { key: String, value: String },

    #[error("increment of '{0}' overflowed")]
    Overflow(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl KvError {
    pub fn class(&self) -> ErrorClass {
        match self {
            KvError::Unavailable(_) => ErrorClass::Transient,
            _ => ErrorClass::Protocol,
        }
    }
}

/// Result type for KV operations
pub type Result<T> = std::result::Result<T, KvError>;
