//! Tasks: units of work dispatched to agents.
//!
//! A task's payload is a tagged variant discriminated by `action`; each
//! variant belongs to exactly one agent type, so a malformed or mismatched
//! payload is caught at ingress instead of deep in agent logic.

use crate::ids::{EnvelopeId, TaskId, WorkflowId};
use crate::stage::{AgentType, Stage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reference to an artifact produced or consumed by a stage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub name: String,
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl ArtifactRef {
    pub fn new(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
            digest: None,
        }
    }
}

/// Output recorded for a completed stage and forwarded as context to later
/// stages.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<ArtifactRef>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

impl StageOutput {
    pub fn with_summary(summary: impl Into<String>) -> Self {
        Self {
            summary: Some(summary.into()),
            ..Default::default()
        }
    }

    pub fn with_artifact(mut self, artifact: ArtifactRef) -> Self {
        self.artifacts.push(artifact);
        self
    }
}

/// The work an agent is asked to perform.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TaskAction {
    ScaffoldProject {
        requirements: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        template: Option<String>,
    },
    ValidateArtifacts {
        artifacts: Vec<ArtifactRef>,
    },
    RunTests {
        artifacts: Vec<ArtifactRef>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        suites: Vec<String>,
    },
    IntegrateChanges {
        artifacts: Vec<ArtifactRef>,
        target_branch: String,
    },
    DeployRelease {
        artifacts: Vec<ArtifactRef>,
        environment: String,
    },
}

impl TaskAction {
    /// The only agent type allowed to receive this action.
    pub fn agent_type(&self) -> AgentType {
        match self {
            TaskAction::ScaffoldProject { .. } => AgentType::Scaffolder,
            TaskAction::ValidateArtifacts { .. } => AgentType::Validator,
            TaskAction::RunTests { .. } => AgentType::Tester,
            TaskAction::IntegrateChanges { .. } => AgentType::Integrator,
            TaskAction::DeployRelease { .. } => AgentType::Deployer,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TaskAction::ScaffoldProject { .. } => "scaffold_project",
            TaskAction::ValidateArtifacts { .. } => "validate_artifacts",
            TaskAction::RunTests { .. } => "run_tests",
            TaskAction::IntegrateChanges { .. } => "integrate_changes",
            TaskAction::DeployRelease { .. } => "deploy_release",
        }
    }
}

/// Task payload: the action plus forwarded context from earlier stages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub work: TaskAction,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<Stage, StageOutput>,
    /// Operator answers to clarification questions, oldest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clarifications: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Dispatched,
    Completed,
    Failed,
    Timeout,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Timeout)
    }
}

/// A unit of work for one stage of one workflow.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub workflow_id: WorkflowId,
    pub stage: Stage,
    pub agent_type: AgentType,
    pub priority: TaskPriority,
    pub payload: TaskPayload,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Id of the dispatch envelope; reused when a timed-out task is re-sent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envelope_id: Option<EnvelopeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatched_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        workflow_id: WorkflowId,
        stage: Stage,
        agent_type: AgentType,
        payload: TaskPayload,
    ) -> Self {
        let now = Utc::now();
        Self {
            task_id: TaskId::generate(),
            workflow_id,
            stage,
            agent_type,
            priority: TaskPriority::Normal,
            payload,
            status: TaskStatus::Pending,
            retry_count: 0,
            max_retries: 3,
            timeout_ms: 300_000,
            tenant_id: None,
            envelope_id: None,
            last_error: None,
            created_at: now,
            dispatched_at: None,
            updated_at: now,
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_tenant(mut self, tenant_id: Option<String>) -> Self {
        self.tenant_id = tenant_id;
        self
    }

    pub fn with_limits(mut self, max_retries: u32, timeout_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.timeout_ms = timeout_ms;
        self
    }

    /// Name of the action carried by the payload.
    pub fn action(&self) -> &'static str {
        self.payload.work.name()
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// A dispatched task whose deadline has passed.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        if self.status != TaskStatus::Dispatched {
            return false;
        }
        match self.dispatched_at {
            Some(at) => {
                let elapsed = now.signed_duration_since(at).num_milliseconds();
                elapsed >= 0 && elapsed as u64 >= self.timeout_ms
            }
            None => false,
        }
    }

    pub fn mark_dispatched(&mut self, envelope_id: EnvelopeId) {
        let now = Utc::now();
        self.status = TaskStatus::Dispatched;
        self.envelope_id = Some(envelope_id);
        self.dispatched_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_retried(&mut self, reason: impl Into<String>) {
        let now = Utc::now();
        self.retry_count += 1;
        self.last_error = Some(reason.into());
        self.status = TaskStatus::Dispatched;
        self.dispatched_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_completed(&mut self) {
        self.status = TaskStatus::Completed;
        self.updated_at = Utc::now();
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.last_error = Some(reason.into());
        self.updated_at = Utc::now();
    }

    pub fn mark_timeout(&mut self) {
        self.status = TaskStatus::Timeout;
        self.last_error = Some(format!("no result within {}ms", self.timeout_ms));
        self.updated_at = Utc::now();
    }
}
