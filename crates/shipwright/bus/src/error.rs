//! Bus error types

use shipwright_kv::KvError;
use shipwright_schema::SchemaError;
use shipwright_types::ErrorClass;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("stream '{stream}' has no consumer group '{group}'")]
    UnknownGroup { stream: String, group: String },

    #[error("handler already registered for {stream}/{group}")]
    AlreadySubscribed { stream: String, group: String },

    #[error("bus is shut down")]
    Closed,

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Kv(#[from] KvError),
}

impl BusError {
    pub fn class(&self) -> ErrorClass {
        match self {
            BusError::Schema(e) => e.class(),
            BusError::Kv(e) => e.class(),
            BusError::Closed => ErrorClass::Transient,
            BusError::UnknownGroup { .. } | BusError::AlreadySubscribed { .. } => {
                ErrorClass::Protocol
            }
        }
    }
}

/// Failure reported by a [`MessageHandler`](crate::MessageHandler).
///
/// Any handler error blocks acknowledgement; the entry is redelivered until
/// the dead-letter ceiling.
#[derive(Debug, Error)]
#[error("{class}: {message}")]
pub struct HandlerError {
    pub class: ErrorClass,
    pub message: String,
}

impl HandlerError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Transient, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Protocol, message)
    }
}

/// Result type for bus operations
pub type Result<T> = std::result::Result<T, BusError>;
