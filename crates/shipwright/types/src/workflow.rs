//! Workflows: the per-submission record driven by the orchestration service.
//!
//! A Workflow tracks the current stage and status, the append-only map of
//! stage outputs, pending human gates, and a history of every status
//! transition. Only the orchestration service mutates it.

use crate::envelope::CorrelationId;
use crate::error::ErrorClass;
use crate::ids::{ClarificationId, DecisionId, TaskId, WorkflowId};
use crate::stage::{Stage, WorkflowType};
use crate::task::StageOutput;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ── Status ───────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Created, first stage not yet dispatched
    #[default]
    Initiated,
    Running,
    AwaitingDecision,
    AwaitingClarification,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::Running => "running",
            Self::AwaitingDecision => "awaiting_decision",
            Self::AwaitingClarification => "awaiting_clarification",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Gates ────────────────────────────────────────────────────────────

/// Category of change a decision gate guards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionCategory {
    ArchitecturalChange,
    DependencyChange,
    SecuritySensitive,
    DataMigration,
    ProductionRelease,
}

impl fmt::Display for DecisionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ArchitecturalChange => "architectural_change",
            Self::DependencyChange => "dependency_change",
            Self::SecuritySensitive => "security_sensitive",
            Self::DataMigration => "data_migration",
            Self::ProductionRelease => "production_release",
        };
        f.write_str(s)
    }
}

/// Approval the workflow is waiting for.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingDecision {
    pub decision_id: DecisionId,
    pub stage: Stage,
    pub category: DecisionCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    pub requested_at: DateTime<Utc>,
}

/// Answer the workflow is waiting for.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingClarification {
    pub clarification_id: ClarificationId,
    pub stage: Stage,
    pub questions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirement_confidence: Option<f64>,
    pub requested_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClarificationAnswer {
    pub clarification_id: ClarificationId,
    pub stage: Stage,
    pub answers: Vec<String>,
    pub answered_at: DateTime<Utc>,
}

/// Why a workflow failed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub class: ErrorClass,
    pub stage: Stage,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// One entry of the transition history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub sequence: u64,
    pub from: WorkflowStatus,
    pub to: WorkflowStatus,
    pub stage: Stage,
    pub trigger: String,
    pub at: DateTime<Utc>,
}

// ── Workflow ─────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub workflow_id: WorkflowId,
    #[serde(rename = "type")]
    pub workflow_type: WorkflowType,
    pub current_stage: Stage,
    pub status: WorkflowStatus,
    pub progress_percent: u8,
    /// Append-only; forwarded as context to later stages
    #[serde(default)]
    pub stage_outputs: BTreeMap<Stage, StageOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<PendingDecision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarification: Option<PendingClarification>,
    /// The task whose result the current stage is waiting for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_task_id: Option<TaskId>,
    pub requirements: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub clarifications: Vec<ClarificationAnswer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureInfo>,
    /// Optimistic concurrency token, bumped by the store on every save
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub history: Vec<TransitionRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(workflow_type: WorkflowType, requirements: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            workflow_id: WorkflowId::generate(),
            workflow_type,
            current_stage: workflow_type.first_stage(),
            status: WorkflowStatus::Initiated,
            progress_percent: 0,
            stage_outputs: BTreeMap::new(),
            decision: None,
            clarification: None,
            active_task_id: None,
            requirements: requirements.into(),
            tenant_id: None,
            clarifications: Vec::new(),
            failure: None,
            version: 0,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn stages(&self) -> &'static [Stage] {
        self.workflow_type.stages()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Correlation id shared by every message of this workflow.
    pub fn trace_id(&self) -> CorrelationId {
        CorrelationId::from(self.workflow_id)
    }

    /// Stage following the current one, if any.
    pub fn next_stage(&self) -> Option<Stage> {
        self.workflow_type.next_stage(self.current_stage)
    }

    /// Record a stage output. Returns false (and leaves the map untouched)
    /// when the stage already has one.
    pub fn record_output(&mut self, stage: Stage, output: StageOutput) -> bool {
        if self.stage_outputs.contains_key(&stage) {
            return false;
        }
        self.stage_outputs.insert(stage, output);
        self.updated_at = Utc::now();
        true
    }

    /// Answers supplied for clarifications of `stage`, oldest first.
    pub fn answers_for(&self, stage: Stage) -> Vec<String> {
        self.clarifications
            .iter()
            .filter(|c| c.stage == stage)
            .flat_map(|c| c.answers.iter().cloned())
            .collect()
    }

    /// Recompute `progress_percent` from completed stages.
    pub fn recompute_progress(&mut self) {
        if self.status == WorkflowStatus::Completed {
            self.progress_percent = 100;
            return;
        }
        let stages = self.stages();
        let done = stages
            .iter()
            .filter(|s| self.stage_outputs.contains_key(s))
            .count();
        self.progress_percent = ((done * 100) / stages.len()).min(100) as u8;
    }

    /// Move to `to`, appending a history record.
    pub fn transition(&mut self, to: WorkflowStatus, trigger: impl Into<String>) {
        let now = Utc::now();
        self.history.push(TransitionRecord {
            sequence: self.history.len() as u64,
            from: self.status,
            to,
            stage: self.current_stage,
            trigger: trigger.into(),
            at: now,
        });
        self.status = to;
        self.updated_at = now;
    }
}

// ── Events ───────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowEventKind {
    Started,
    StageAdvanced,
    ApprovalRequired,
    ClarificationRequired,
    Paused,
    Resumed,
    Completed,
    Failed,
    Cancelled,
}

/// Low-value status signal published on the pub/sub events channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub workflow_id: WorkflowId,
    pub kind: WorkflowEventKind,
    pub stage: Stage,
    pub status: WorkflowStatus,
    pub progress_percent: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<PendingDecision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarification: Option<PendingClarification>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl WorkflowEvent {
    pub fn from_workflow(workflow: &Workflow, kind: WorkflowEventKind) -> Self {
        Self {
            workflow_id: workflow.workflow_id,
            kind,
            stage: workflow.current_stage,
            status: workflow.status,
            progress_percent: workflow.progress_percent,
            decision: workflow.decision.clone(),
            clarification: workflow.clarification.clone(),
            detail: workflow.failure.as_ref().map(|f| f.message.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_workflow_starts_at_first_stage() {
        let wf = Workflow::new(WorkflowType::Release, "ship it");
        assert_eq!(wf.current_stage, Stage::Test);
        assert_eq!(wf.status, WorkflowStatus::Initiated);
        assert_eq!(wf.progress_percent, 0);
    }

    #[test]
    fn test_outputs_are_append_only() {
        let mut wf = Workflow::new(WorkflowType::Prototype, "app");
        assert!(wf.record_output(Stage::Scaffold, StageOutput::with_summary("first")));
        assert!(!wf.record_output(Stage::Scaffold, StageOutput::with_summary("second")));
        assert_eq!(
            wf.stage_outputs[&Stage::Scaffold].summary.as_deref(),
            Some("first")
        );
    }

    #[test]
    fn test_progress_recompute() {
        let mut wf = Workflow::new(WorkflowType::Prototype, "app");
        wf.record_output(Stage::Scaffold, StageOutput::default());
        wf.recompute_progress();
        assert_eq!(wf.progress_percent, 33);

        wf.transition(WorkflowStatus::Completed, "test");
        wf.recompute_progress();
        assert_eq!(wf.progress_percent, 100);
    }

    #[test]
    fn test_transition_records_history() {
        let mut wf = Workflow::new(WorkflowType::Delivery, "app");
        wf.transition(WorkflowStatus::Running, "start");
        wf.transition(WorkflowStatus::Cancelled, "operator");
        assert_eq!(wf.history.len(), 2);
        assert_eq!(wf.history[1].from, WorkflowStatus::Running);
        assert_eq!(wf.history[1].to, WorkflowStatus::Cancelled);
        assert!(wf.is_terminal());
    }

    #[test]
    fn test_stage_outputs_serialize_with_stage_keys() {
        let mut wf = Workflow::new(WorkflowType::Prototype, "app");
        wf.record_output(Stage::Scaffold, StageOutput::with_summary("ok"));
        let value = serde_json::to_value(&wf).unwrap();
        assert_eq!(value["stage_outputs"]["scaffold"]["summary"], "ok");
        assert_eq!(value["type"], "prototype");
    }
}
