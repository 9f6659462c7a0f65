//! Workflow error types

use shipwright_types::{
    ClarificationId, DecisionId, ErrorClass, Stage, TaskId, WorkflowId, WorkflowStatus,
};
use thiserror::Error;

/// A transition attempt that failed a state-machine guard.
///
/// For results these are usually legitimate redeliveries: they are logged
/// and acknowledged, never surfaced as caller errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GuardRejection {
    #[error("workflow is terminal ({0})")]
    Terminal(WorkflowStatus),

    #[error("workflow is {found}, operation needs {expected}")]
    WrongStatus {
        found: WorkflowStatus,
        expected: &'static str,
    },

    #[error("result for stage {found}, workflow is at {current}")]
    StaleStage { found: Stage, current: Stage },

    #[error("result for task {found}, active task is {active:?}")]
    TaskMismatch {
        found: TaskId,
        active: Option<TaskId>,
    },

    #[error("stage {0} already has an output")]
    DuplicateOutput(Stage),

    #[error("decision {found} does not match pending decision {pending:?}")]
    DecisionMismatch {
        found: DecisionId,
        pending: Option<DecisionId>,
    },

    #[error("clarification {found} does not match pending clarification {pending:?}")]
    ClarificationMismatch {
        found: ClarificationId,
        pending: Option<ClarificationId>,
    },
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("guard rejected transition: {0}")]
    Rejected(#[from] GuardRejection),

    #[error("workflow not found: {0}")]
    NotFound(WorkflowId),

    #[error("workflow already exists: {0}")]
    AlreadyExists(WorkflowId),

    #[error("version conflict on workflow {workflow_id}: expected {expected}, found {found}")]
    VersionConflict {
        workflow_id: WorkflowId,
        expected: u64,
        found: u64,
    },
}

impl WorkflowError {
    pub fn class(&self) -> ErrorClass {
        match self {
            WorkflowError::Rejected(_) => ErrorClass::GuardRejection,
            WorkflowError::NotFound(_) | WorkflowError::AlreadyExists(_) => ErrorClass::Protocol,
            WorkflowError::VersionConflict { .. } => ErrorClass::Transient,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, WorkflowError::VersionConflict { .. })
    }
}

/// Result type for workflow operations
pub type Result<T> = std::result::Result<T, WorkflowError>;
