//! Task persistence.

use crate::error::{DispatchError, Result};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use shipwright_types::{Task, TaskId, TaskStatus, WorkflowId};
use std::sync::Arc;

/// Primary-key task storage owned by the dispatcher.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert(&self, task: Task) -> Result<()>;

    async fn get(&self, task_id: &TaskId) -> Result<Option<Task>>;

    /// Replace an existing task.
    async fn update(&self, task: Task) -> Result<()>;

    async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>>;

    async fn list_for_workflow(&self, workflow_id: &WorkflowId) -> Result<Vec<Task>>;
}

/// In-memory task store for development and testing.
#[derive(Clone, Default)]
pub struct InMemoryTaskStore {
    tasks: Arc<DashMap<TaskId, Task>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: Task) -> Result<()> {
        match self.tasks.entry(task.task_id) {
            Entry::Occupied(_) => Err(DispatchError::DuplicateTask(task.task_id)),
            Entry::Vacant(vacant) => {
                vacant.insert(task);
                Ok(())
            }
        }
    }

    async fn get(&self, task_id: &TaskId) -> Result<Option<Task>> {
        Ok(self.tasks.get(task_id).map(|t| t.clone()))
    }

    async fn update(&self, task: Task) -> Result<()> {
        match self.tasks.get_mut(&task.task_id) {
            Some(mut existing) => {
                *existing = task;
                Ok(())
            }
            None => Err(DispatchError::UnknownTask(task.task_id)),
        }
    }

    async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .tasks
            .iter()
            .filter(|t| t.status == status)
            .map(|t| t.clone())
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    async fn list_for_workflow(&self, workflow_id: &WorkflowId) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .tasks
            .iter()
            .filter(|t| t.workflow_id == *workflow_id)
            .map(|t| t.clone())
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }
}
