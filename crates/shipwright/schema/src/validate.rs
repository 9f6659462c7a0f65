//! Semantic payload validation.
//!
//! Deserialization enforces shape; [`Validate`] enforces the rules shape
//! cannot express (consistent flags, value ranges, action/agent agreement).

use shipwright_types::{AgentResult, DeadLetterRecord, Task, WorkflowEvent};

/// Semantic checks on a decoded payload. Reports every problem found.
pub trait Validate {
    fn validate(&self) -> Result<(), Vec<String>>;
}

impl Validate for AgentResult {
    fn validate(&self) -> Result<(), Vec<String>> {
        self.check()
    }
}

impl Validate for Task {
    fn validate(&self) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();

        let expected = self.payload.work.agent_type();
        if expected != self.agent_type {
            problems.push(format!(
                "action '{}' belongs to {} but task targets {}",
                self.action(),
                expected,
                self.agent_type
            ));
        }
        if self.timeout_ms == 0 {
            problems.push("timeout_ms must be positive".to_string());
        }
        if self.retry_count > self.max_retries {
            problems.push(format!(
                "retry_count {} exceeds max_retries {}",
                self.retry_count, self.max_retries
            ));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

impl Validate for WorkflowEvent {
    fn validate(&self) -> Result<(), Vec<String>> {
        if self.progress_percent > 100 {
            return Err(vec![format!(
                "progress_percent {} exceeds 100",
                self.progress_percent
            )]);
        }
        Ok(())
    }
}

impl Validate for DeadLetterRecord {
    fn validate(&self) -> Result<(), Vec<String>> {
        if self.source_stream.is_empty() {
            return Err(vec!["source_stream must not be empty".to_string()]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipwright_types::{AgentType, Stage, TaskAction, TaskPayload, WorkflowId};

    #[test]
    fn test_task_action_must_match_agent() {
        let task = Task::new(
            WorkflowId::generate(),
            Stage::Test,
            AgentType::Deployer,
            TaskPayload {
                work: TaskAction::RunTests {
                    artifacts: vec![],
                    suites: vec![],
                },
                context: Default::default(),
                clarifications: vec![],
            },
        );
        let problems = task.validate().unwrap_err();
        assert!(problems[0].contains("belongs to tester"));
    }
}
