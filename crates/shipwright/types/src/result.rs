//! Agent results: the completion signal for a dispatched task.

use crate::ids::{AgentId, TaskId, WorkflowId};
use crate::stage::AgentType;
use crate::task::StageOutput;
use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Completed,
    Failed,
    /// The agent declined the task (unsupported input, policy refusal)
    Rejected,
}

/// Business-level error reported by an agent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentError {
    pub code: String,
    pub message: String,
    /// The agent believes a re-dispatch could succeed
    #[serde(default)]
    pub retryable: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMetrics {
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, f64>,
}

/// Questions an agent needs answered before it can finish a stage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClarificationRequest {
    #[serde(default)]
    pub questions: Vec<String>,
    /// The agent's confidence that it understood the requirements (0..=1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirement_confidence: Option<f64>,
}

/// Result of a task as reported by an agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub task_id: TaskId,
    pub workflow_id: WorkflowId,
    pub agent_id: AgentId,
    pub agent_type: AgentType,
    pub success: bool,
    pub status: ResultStatus,
    #[serde(default)]
    pub result: StageOutput,
    #[serde(default)]
    pub metrics: ResultMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<AgentError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub schema_version: Version,
    /// Agent's confidence in its own output (0..=1), consulted by decision gates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarification: Option<ClarificationRequest>,
}

impl AgentResult {
    /// A successful result carrying `output`.
    pub fn succeeded(
        task_id: TaskId,
        workflow_id: WorkflowId,
        agent_id: AgentId,
        agent_type: AgentType,
        output: StageOutput,
    ) -> Self {
        Self {
            task_id,
            workflow_id,
            agent_id,
            agent_type,
            success: true,
            status: ResultStatus::Completed,
            result: output,
            metrics: ResultMetrics::default(),
            error: None,
            warnings: Vec::new(),
            timestamp: Utc::now(),
            schema_version: Version::new(1, 0, 0),
            confidence: None,
            clarification: None,
        }
    }

    /// A failed result carrying `error`.
    pub fn failed(
        task_id: TaskId,
        workflow_id: WorkflowId,
        agent_id: AgentId,
        agent_type: AgentType,
        error: AgentError,
    ) -> Self {
        Self {
            task_id,
            workflow_id,
            agent_id,
            agent_type,
            success: false,
            status: ResultStatus::Failed,
            result: StageOutput::default(),
            metrics: ResultMetrics::default(),
            error: Some(error),
            warnings: Vec::new(),
            timestamp: Utc::now(),
            schema_version: Version::new(1, 0, 0),
            confidence: None,
            clarification: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_clarification(mut self, request: ClarificationRequest) -> Self {
        self.clarification = Some(request);
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.metrics.duration_ms = duration_ms;
        self
    }

    /// Semantic checks beyond what deserialization enforces.
    ///
    /// Returns every violation found, not just the first.
    pub fn check(&self) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();

        match (self.success, self.status) {
            (true, ResultStatus::Completed) => {}
            (false, ResultStatus::Failed | ResultStatus::Rejected) => {}
            (success, status) => problems.push(format!(
                "success={} is inconsistent with status={:?}",
                success, status
            )),
        }

        if !self.success && self.error.is_none() {
            problems.push("failed result must carry an error".to_string());
        }

        if self.agent_id.as_str().trim().is_empty() {
            problems.push("agent_id must not be empty".to_string());
        }

        if let Some(c) = self.confidence {
            if !(0.0..=1.0).contains(&c) || c.is_nan() {
                problems.push(format!("confidence {} outside [0, 1]", c));
            }
        }

        if let Some(clarification) = &self.clarification {
            if let Some(c) = clarification.requirement_confidence {
                if !(0.0..=1.0).contains(&c) || c.is_nan() {
                    problems.push(format!("requirement_confidence {} outside [0, 1]", c));
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_result() -> AgentResult {
        AgentResult::succeeded(
            TaskId::generate(),
            WorkflowId::generate(),
            AgentId::new("scaffolder-1"),
            AgentType::Scaffolder,
            StageOutput::with_summary("done"),
        )
    }

    #[test]
    fn test_success_passes_checks() {
        assert!(ok_result().check().is_ok());
    }

    #[test]
    fn test_inconsistent_status_is_reported() {
        let mut result = ok_result();
        result.status = ResultStatus::Failed;
        let problems = result.check().unwrap_err();
        assert!(problems.iter().any(|p| p.contains("inconsistent")));
    }

    #[test]
    fn test_failure_requires_error() {
        let mut result = ok_result();
        result.success = false;
        result.status = ResultStatus::Failed;
        let problems = result.check().unwrap_err();
        assert!(problems.iter().any(|p| p.contains("must carry an error")));
    }

    #[test]
    fn test_confidence_range() {
        let result = ok_result().with_confidence(1.5);
        assert!(result.check().is_err());
        assert!(ok_result().with_confidence(0.8).check().is_ok());
    }
}
