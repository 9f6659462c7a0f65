//! Dispatcher error types

use shipwright_bus::BusError;
use shipwright_schema::SchemaError;
use shipwright_types::{ErrorClass, Stage, TaskId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// The agent broke the wire contract. Never coerced.
    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("no agent type routes stage '{0}'")]
    Unrouted(Stage),

    #[error("task not found: {0}")]
    UnknownTask(TaskId),

    #[error("task already exists: {0}")]
    DuplicateTask(TaskId),

    #[error("publish to '{stream}' failed after {attempts} attempts: {message}")]
    Publish {
        stream: String,
        attempts: u32,
        message: String,
    },

    #[error("task {task_id} has no retries left ({retries} used)")]
    RetriesExhausted { task_id: TaskId, retries: u32 },

    #[error("task store error: {0}")]
    Store(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Bus(#[from] BusError),
}

impl DispatchError {
    pub fn class(&self) -> ErrorClass {
        match self {
            DispatchError::Protocol(_)
            | DispatchError::Unrouted(_)
            | DispatchError::DuplicateTask(_) => ErrorClass::Protocol,
            DispatchError::Schema(e) => e.class(),
            DispatchError::Bus(e) => e.class(),
            DispatchError::UnknownTask(_) | DispatchError::Store(_) => ErrorClass::Transient,
            DispatchError::Publish { .. } | DispatchError::RetriesExhausted { .. } => {
                ErrorClass::ExhaustedRetry
            }
        }
    }
}

/// Result type for dispatcher operations
pub type Result<T> = std::result::Result<T, DispatchError>;
