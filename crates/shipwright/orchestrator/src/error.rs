//! Orchestrator error types

use shipwright_bus::{BusError, HandlerError};
use shipwright_dispatcher::DispatchError;
use shipwright_schema::SchemaError;
use shipwright_types::{ErrorClass, WorkflowId};
use shipwright_workflow::{GuardRejection, WorkflowError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("orchestration service already started")]
    AlreadyStarted,

    #[error("workflow {workflow_id} kept conflicting after {attempts} attempts")]
    ConflictRetriesExhausted {
        workflow_id: WorkflowId,
        attempts: u32,
    },

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl From<GuardRejection> for OrchestratorError {
    fn from(rejection: GuardRejection) -> Self {
        OrchestratorError::Workflow(WorkflowError::Rejected(rejection))
    }
}

impl OrchestratorError {
    pub fn class(&self) -> ErrorClass {
        match self {
            OrchestratorError::AlreadyStarted | OrchestratorError::Config(_) => ErrorClass::Protocol,
            OrchestratorError::ConflictRetriesExhausted { .. } => ErrorClass::Transient,
            OrchestratorError::Workflow(e) => e.class(),
            OrchestratorError::Dispatch(e) => e.class(),
            OrchestratorError::Bus(e) => e.class(),
            OrchestratorError::Schema(e) => e.class(),
        }
    }

    /// The guard rejection behind this error, if any.
    pub fn rejection(&self) -> Option<&GuardRejection> {
        match self {
            OrchestratorError::Workflow(WorkflowError::Rejected(r)) => Some(r),
            _ => None,
        }
    }
}

impl From<OrchestratorError> for HandlerError {
    fn from(e: OrchestratorError) -> Self {
        HandlerError::new(e.class(), e.to_string())
    }
}

/// Result type for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestratorError>;
