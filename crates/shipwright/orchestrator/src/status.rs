//! Operator-facing workflow status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shipwright_types::{
    FailureInfo, PendingClarification, PendingDecision, Stage, TaskId, Workflow, WorkflowId,
    WorkflowStatus, WorkflowType,
};

/// Exit code for a workflow that is still in progress (`EX_TEMPFAIL`).
pub const EXIT_STILL_RUNNING: i32 = 75;

/// Snapshot of a workflow for operators and non-interactive callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusView {
    pub workflow_id: WorkflowId,
    pub workflow_type: WorkflowType,
    pub status: WorkflowStatus,
    pub current_stage: Stage,
    pub progress_percent: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_task_id: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<PendingDecision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarification: Option<PendingClarification>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureInfo>,
    pub completed_stages: Vec<Stage>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Workflow> for StatusView {
    fn from(wf: &Workflow) -> Self {
        Self {
            workflow_id: wf.workflow_id,
            workflow_type: wf.workflow_type,
            status: wf.status,
            current_stage: wf.current_stage,
            progress_percent: wf.progress_percent,
            active_task_id: wf.active_task_id,
            decision: wf.decision.clone(),
            clarification: wf.clarification.clone(),
            failure: wf.failure.clone(),
            completed_stages: wf.stage_outputs.keys().copied().collect(),
            updated_at: wf.updated_at,
        }
    }
}

impl StatusView {
    /// Process exit code for CLI callers: 0 completed, 1 failed, 2 awaiting
    /// decision, 3 awaiting clarification, 4 cancelled, 75 still running.
    pub fn exit_code(&self) -> i32 {
        match self.status {
            WorkflowStatus::Completed => 0,
            WorkflowStatus::Failed => 1,
            WorkflowStatus::AwaitingDecision => 2,
            WorkflowStatus::AwaitingClarification => 3,
            WorkflowStatus::Cancelled => 4,
            WorkflowStatus::Initiated | WorkflowStatus::Running | WorkflowStatus::Paused => {
                EXIT_STILL_RUNNING
            }
        }
    }

    /// Terminal, or waiting on an operator.
    pub fn is_settled(&self) -> bool {
        self.status.is_terminal()
            || matches!(
                self.status,
                WorkflowStatus::AwaitingDecision | WorkflowStatus::AwaitingClarification
            )
    }
}

/// What [`await_settled`](crate::OrchestrationService::await_settled) saw.
#[derive(Debug, Clone, PartialEq)]
pub enum SettleOutcome {
    Completed(StatusView),
    Failed(StatusView),
    Cancelled(StatusView),
    NeedsDecision(StatusView),
    NeedsClarification(StatusView),
    /// Still running when the wait ran out
    TimedOut(StatusView),
}

impl SettleOutcome {
    pub(crate) fn from_view(view: StatusView) -> Option<Self> {
        match view.status {
            WorkflowStatus::Completed => Some(Self::Completed(view)),
            WorkflowStatus::Failed => Some(Self::Failed(view)),
            WorkflowStatus::Cancelled => Some(Self::Cancelled(view)),
            WorkflowStatus::AwaitingDecision => Some(Self::NeedsDecision(view)),
            WorkflowStatus::AwaitingClarification => Some(Self::NeedsClarification(view)),
            WorkflowStatus::Initiated | WorkflowStatus::Running | WorkflowStatus::Paused => None,
        }
    }

    pub fn view(&self) -> &StatusView {
        match self {
            Self::Completed(v)
            | Self::Failed(v)
            | Self::Cancelled(v)
            | Self::NeedsDecision(v)
            | Self::NeedsClarification(v)
            | Self::TimedOut(v) => v,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.view().exit_code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(status: WorkflowStatus) -> StatusView {
        let mut wf = Workflow::new(WorkflowType::Delivery, "app");
        wf.status = status;
        StatusView::from(&wf)
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(view(WorkflowStatus::Completed).exit_code(), 0);
        assert_eq!(view(WorkflowStatus::Failed).exit_code(), 1);
        assert_eq!(view(WorkflowStatus::AwaitingDecision).exit_code(), 2);
        assert_eq!(view(WorkflowStatus::AwaitingClarification).exit_code(), 3);
        assert_eq!(view(WorkflowStatus::Cancelled).exit_code(), 4);
        assert_eq!(view(WorkflowStatus::Running).exit_code(), EXIT_STILL_RUNNING);
        assert_eq!(view(WorkflowStatus::Paused).exit_code(), EXIT_STILL_RUNNING);
    }

    #[test]
    fn test_settle_outcome_mapping() {
        assert!(matches!(
            SettleOutcome::from_view(view(WorkflowStatus::AwaitingDecision)),
            Some(SettleOutcome::NeedsDecision(_))
        ));
        assert!(SettleOutcome::from_view(view(WorkflowStatus::Paused)).is_none());
        assert!(!view(WorkflowStatus::Paused).is_settled());
        assert!(view(WorkflowStatus::AwaitingClarification).is_settled());
    }
}
