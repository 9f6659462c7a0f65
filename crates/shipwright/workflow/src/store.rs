//! Workflow persistence with optimistic concurrency.

use crate::error::{Result, WorkflowError};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use shipwright_types::{Workflow, WorkflowId, WorkflowStatus};
use std::sync::Arc;

/// Primary-key workflow storage.
///
/// `save` succeeds only if the stored version equals the caller's; the
/// returned record carries the bumped version.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn insert(&self, workflow: Workflow) -> Result<()>;

    async fn get(&self, workflow_id: &WorkflowId) -> Result<Option<Workflow>>;

    async fn save(&self, workflow: Workflow) -> Result<Workflow>;

    async fn list(&self, status: Option<WorkflowStatus>) -> Result<Vec<Workflow>>;
}

/// In-memory workflow store for development and testing.
#[derive(Clone, Default)]
pub struct InMemoryWorkflowStore {
    workflows: Arc<DashMap<WorkflowId, Workflow>>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn insert(&self, workflow: Workflow) -> Result<()> {
        match self.workflows.entry(workflow.workflow_id) {
            Entry::Occupied(_) => Err(WorkflowError::AlreadyExists(workflow.workflow_id)),
            Entry::Vacant(vacant) => {
                vacant.insert(workflow);
                Ok(())
            }
        }
    }

    async fn get(&self, workflow_id: &WorkflowId) -> Result<Option<Workflow>> {
        Ok(self.workflows.get(workflow_id).map(|w| w.clone()))
    }

    async fn save(&self, mut workflow: Workflow) -> Result<Workflow> {
        let mut stored = self
            .workflows
            .get_mut(&workflow.workflow_id)
            .ok_or(WorkflowError::NotFound(workflow.workflow_id))?;
        if stored.version != workflow.version {
            return Err(WorkflowError::VersionConflict {
                workflow_id: workflow.workflow_id,
                expected: workflow.version,
                found: stored.version,
            });
        }
        workflow.version += 1;
        *stored = workflow.clone();
        Ok(workflow)
    }

    async fn list(&self, status: Option<WorkflowStatus>) -> Result<Vec<Workflow>> {
        let mut workflows: Vec<Workflow> = self
            .workflows
            .iter()
            .filter(|w| status.map_or(true, |s| w.status == s))
            .map(|w| w.clone())
            .collect();
        workflows.sort_by_key(|w| w.created_at);
        Ok(workflows)
    }
}
