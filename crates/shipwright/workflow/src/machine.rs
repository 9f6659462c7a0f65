//! The workflow state machine.
//!
//! Pure transition logic over a [`Workflow`] record: guards, gates and the
//! static stage sequence. The machine never performs I/O; it returns the
//! effects (dispatches, events) the orchestration service must carry out.
//!
//! ```text
//! initiated ─▶ running(k) ─▶ running(k+1) ─▶ … ─▶ completed
//!                 │  ▲
//!                 │  └─ approve / answer
//!                 ├─▶ awaiting_decision ─▶ failed (reject)
//!                 ├─▶ awaiting_clarification
//!                 ├─▶ paused ⇄ running
//!                 └─▶ failed
//! any non-terminal ─▶ cancelled
//! ```

use crate::error::GuardRejection;
use crate::policy::GatePolicy;
use chrono::Utc;
use shipwright_types::{
    AgentResult, ClarificationAnswer, ClarificationId, DecisionId, ErrorClass, FailureInfo,
    PendingDecision, Stage, TaskId, Workflow, WorkflowEventKind, WorkflowStatus,
};
use tracing::info;

/// Something the orchestration service must do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Dispatch a task for the stage and record it as the active task
    Dispatch(Stage),
    /// Publish a workflow event
    Emit(WorkflowEventKind),
}

/// Outcome of an accepted transition.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: WorkflowStatus,
    pub to: WorkflowStatus,
    pub stage: Stage,
    pub effects: Vec<Effect>,
}

impl Transition {
    pub fn dispatches(&self) -> impl Iterator<Item = Stage> + '_ {
        self.effects.iter().filter_map(|e| match e {
            Effect::Dispatch(stage) => Some(*stage),
            Effect::Emit(_) => None,
        })
    }

    pub fn events(&self) -> impl Iterator<Item = WorkflowEventKind> + '_ {
        self.effects.iter().filter_map(|e| match e {
            Effect::Emit(kind) => Some(*kind),
            Effect::Dispatch(_) => None,
        })
    }
}

type Outcome = std::result::Result<Transition, GuardRejection>;

#[derive(Debug, Clone, Default)]
pub struct WorkflowStateMachine {
    policy: GatePolicy,
}

impl WorkflowStateMachine {
    pub fn new(policy: GatePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &GatePolicy {
        &self.policy
    }

    /// `initiated → running` at the first stage.
    pub fn start(&self, workflow: &mut Workflow) -> Outcome {
        expect_status(workflow, &[WorkflowStatus::Initiated], "initiated")?;
        let stage = workflow.workflow_type.first_stage();
        workflow.current_stage = stage;
        let from = self.apply(workflow, WorkflowStatus::Running, "submitted");
        Ok(Transition {
            from,
            to: WorkflowStatus::Running,
            stage,
            effects: vec![Effect::Emit(WorkflowEventKind::Started), Effect::Dispatch(stage)],
        })
    }

    /// Apply a result for `stage` produced by task `task_id`.
    ///
    /// A result while paused is applied but the next dispatch waits for
    /// resume.
    pub fn stage_complete(
        &self,
        workflow: &mut Workflow,
        stage: Stage,
        task_id: TaskId,
        result: &AgentResult,
    ) -> Outcome {
        self.guard_stage(workflow, stage, task_id)?;
        if workflow.stage_outputs.contains_key(&stage) {
            return Err(GuardRejection::DuplicateOutput(stage));
        }

        if !result.success {
            let message = result
                .error
                .as_ref()
                .map(|e| format!("{}: {}", e.code, e.message))
                .unwrap_or_else(|| format!("{} stage failed", stage));
            return Ok(self.fail(workflow, ErrorClass::BusinessFailure, message));
        }

        workflow.active_task_id = None;

        if let Some(pending) = self
            .policy
            .clarification_gate(stage, result.clarification.as_ref())
        {
            workflow.clarification = Some(pending);
            let from = self.apply(
                workflow,
                WorkflowStatus::AwaitingClarification,
                "clarification_required",
            );
            return Ok(Transition {
                from,
                to: WorkflowStatus::AwaitingClarification,
                stage,
                effects: vec![Effect::Emit(WorkflowEventKind::ClarificationRequired)],
            });
        }

        workflow.record_output(stage, result.result.clone());

        if let Some(pending) = self.policy.decision_gate(stage, result.confidence) {
            workflow.decision = Some(pending);
            workflow.recompute_progress();
            let from = self.apply(workflow, WorkflowStatus::AwaitingDecision, "approval_required");
            return Ok(Transition {
                from,
                to: WorkflowStatus::AwaitingDecision,
                stage,
                effects: vec![Effect::Emit(WorkflowEventKind::ApprovalRequired)],
            });
        }

        Ok(self.advance(workflow, "stage_complete"))
    }

    /// The stage's task failed outside the agent's control (timeouts out of
    /// retries, undeliverable dispatch).
    pub fn stage_failed(
        &self,
        workflow: &mut Workflow,
        stage: Stage,
        task_id: TaskId,
        class: ErrorClass,
        message: impl Into<String>,
    ) -> Outcome {
        self.guard_stage(workflow, stage, task_id)?;
        Ok(self.fail(workflow, class, message.into()))
    }

    /// Dispatch of the current stage could not be published.
    pub fn dispatch_failed(&self, workflow: &mut Workflow, message: impl Into<String>) -> Outcome {
        ensure_live(workflow)?;
        Ok(self.fail(workflow, ErrorClass::ExhaustedRetry, message.into()))
    }

    pub fn approve_decision(&self, workflow: &mut Workflow, decision_id: DecisionId) -> Outcome {
        self.take_decision(workflow, decision_id)?;
        Ok(self.advance(workflow, "decision_approved"))
    }

    pub fn reject_decision(
        &self,
        workflow: &mut Workflow,
        decision_id: DecisionId,
        reason: Option<&str>,
    ) -> Outcome {
        let pending = self.take_decision(workflow, decision_id)?;
        let message = match reason {
            Some(reason) => format!("{} decision rejected: {}", pending.category, reason),
            None => format!("{} decision rejected", pending.category),
        };
        Ok(self.fail(workflow, ErrorClass::BusinessFailure, message))
    }

    /// Store the answers and re-run the stage that asked.
    pub fn answer_clarification(
        &self,
        workflow: &mut Workflow,
        clarification_id: ClarificationId,
        answers: Vec<String>,
    ) -> Outcome {
        ensure_live(workflow)?;
        expect_status(
            workflow,
            &[WorkflowStatus::AwaitingClarification],
            "awaiting_clarification",
        )?;
        let pending_id = workflow.clarification.as_ref().map(|c| c.clarification_id);
        if pending_id != Some(clarification_id) {
            return Err(GuardRejection::ClarificationMismatch {
                found: clarification_id,
                pending: pending_id,
            });
        }

        let stage = workflow.current_stage;
        workflow.clarification = None;
        workflow.clarifications.push(ClarificationAnswer {
            clarification_id,
            stage,
            answers,
            answered_at: Utc::now(),
        });
        let from = self.apply(workflow, WorkflowStatus::Running, "clarification_answered");
        Ok(Transition {
            from,
            to: WorkflowStatus::Running,
            stage,
            effects: vec![
                Effect::Emit(WorkflowEventKind::Resumed),
                Effect::Dispatch(stage),
            ],
        })
    }

    pub fn pause(&self, workflow: &mut Workflow) -> Outcome {
        ensure_live(workflow)?;
        expect_status(workflow, &[WorkflowStatus::Running], "running")?;
        let from = self.apply(workflow, WorkflowStatus::Paused, "paused");
        Ok(Transition {
            from,
            to: WorkflowStatus::Paused,
            stage: workflow.current_stage,
            effects: vec![Effect::Emit(WorkflowEventKind::Paused)],
        })
    }

    /// `paused → running`; dispatches the current stage if nothing is in
    /// flight for it.
    pub fn resume(&self, workflow: &mut Workflow) -> Outcome {
        ensure_live(workflow)?;
        expect_status(workflow, &[WorkflowStatus::Paused], "paused")?;
        let stage = workflow.current_stage;
        let from = self.apply(workflow, WorkflowStatus::Running, "resumed");
        let mut effects = vec![Effect::Emit(WorkflowEventKind::Resumed)];
        if workflow.active_task_id.is_none() {
            effects.push(Effect::Dispatch(stage));
        }
        Ok(Transition {
            from,
            to: WorkflowStatus::Running,
            stage,
            effects,
        })
    }

    /// Any non-terminal state → `cancelled`. In-flight agent work is not
    /// interrupted; its result will be discarded as stale.
    pub fn cancel(&self, workflow: &mut Workflow, reason: Option<&str>) -> Outcome {
        ensure_live(workflow)?;
        workflow.decision = None;
        workflow.clarification = None;
        let trigger = match reason {
            Some(reason) => format!("cancelled: {}", reason),
            None => "cancelled".to_string(),
        };
        let from = self.apply(workflow, WorkflowStatus::Cancelled, trigger);
        Ok(Transition {
            from,
            to: WorkflowStatus::Cancelled,
            stage: workflow.current_stage,
            effects: vec![Effect::Emit(WorkflowEventKind::Cancelled)],
        })
    }

    // ── Internal helpers ─────────────────────────────────────────────

    fn guard_stage(
        &self,
        workflow: &Workflow,
        stage: Stage,
        task_id: TaskId,
    ) -> Result<(), GuardRejection> {
        ensure_live(workflow)?;
        expect_status(
            workflow,
            &[WorkflowStatus::Running, WorkflowStatus::Paused],
            "running",
        )?;
        if stage != workflow.current_stage {
            return Err(GuardRejection::StaleStage {
                found: stage,
                current: workflow.current_stage,
            });
        }
        if workflow.active_task_id != Some(task_id) {
            return Err(GuardRejection::TaskMismatch {
                found: task_id,
                active: workflow.active_task_id,
            });
        }
        Ok(())
    }

    fn take_decision(
        &self,
        workflow: &mut Workflow,
        decision_id: DecisionId,
    ) -> Result<PendingDecision, GuardRejection> {
        ensure_live(workflow)?;
        expect_status(workflow, &[WorkflowStatus::AwaitingDecision], "awaiting_decision")?;
        let pending_id = workflow.decision.as_ref().map(|d| d.decision_id);
        match workflow.decision.take() {
            Some(pending) if pending.decision_id == decision_id => Ok(pending),
            other => {
                workflow.decision = other;
                Err(GuardRejection::DecisionMismatch {
                    found: decision_id,
                    pending: pending_id,
                })
            }
        }
    }

    /// Move past the current stage: the next stage, or completion.
    /// A paused workflow advances but holds its next dispatch.
    fn advance(&self, workflow: &mut Workflow, trigger: &str) -> Transition {
        let stage = workflow.current_stage;
        workflow.active_task_id = None;

        let Some(next) = workflow.next_stage() else {
            let from = self.apply(workflow, WorkflowStatus::Completed, trigger);
            workflow.recompute_progress();
            return Transition {
                from,
                to: WorkflowStatus::Completed,
                stage,
                effects: vec![Effect::Emit(WorkflowEventKind::Completed)],
            };
        };

        workflow.current_stage = next;
        workflow.recompute_progress();

        if workflow.status == WorkflowStatus::Paused {
            info!(
                workflow_id = %workflow.workflow_id,
                trace_id = %workflow.trace_id(),
                from = %stage,
                to = %next,
                "Stage advanced while paused"
            );
            workflow.updated_at = Utc::now();
            return Transition {
                from: WorkflowStatus::Paused,
                to: WorkflowStatus::Paused,
                stage: next,
                effects: vec![Effect::Emit(WorkflowEventKind::StageAdvanced)],
            };
        }

        let from = self.apply(workflow, WorkflowStatus::Running, trigger);
        Transition {
            from,
            to: WorkflowStatus::Running,
            stage: next,
            effects: vec![
                Effect::Emit(WorkflowEventKind::StageAdvanced),
                Effect::Dispatch(next),
            ],
        }
    }

    fn fail(&self, workflow: &mut Workflow, class: ErrorClass, message: String) -> Transition {
        let stage = workflow.current_stage;
        workflow.failure = Some(FailureInfo {
            class,
            stage,
            message: message.clone(),
            at: Utc::now(),
        });
        workflow.active_task_id = None;
        workflow.decision = None;
        workflow.clarification = None;
        let from = self.apply(workflow, WorkflowStatus::Failed, format!("{}: {}", class, message));
        Transition {
            from,
            to: WorkflowStatus::Failed,
            stage,
            effects: vec![Effect::Emit(WorkflowEventKind::Failed)],
        }
    }

    /// Record and log a status change. Returns the prior status.
    fn apply(
        &self,
        workflow: &mut Workflow,
        to: WorkflowStatus,
        trigger: impl Into<String>,
    ) -> WorkflowStatus {
        let from = workflow.status;
        let trigger = trigger.into();
        info!(
            workflow_id = %workflow.workflow_id,
            trace_id = %workflow.trace_id(),
            from = %from,
            to = %to,
            stage = %workflow.current_stage,
            trigger = %trigger,
            "Workflow transition"
        );
        workflow.transition(to, trigger);
        from
    }
}

fn ensure_live(workflow: &Workflow) -> Result<(), GuardRejection> {
    if workflow.is_terminal() {
        return Err(GuardRejection::Terminal(workflow.status));
    }
    Ok(())
}

fn expect_status(
    workflow: &Workflow,
    allowed: &[WorkflowStatus],
    expected: &'static str,
) -> Result<(), GuardRejection> {
    if allowed.contains(&workflow.status) {
        Ok(())
    } else {
        Err(GuardRejection::WrongStatus {
            found: workflow.status,
            expected,
        })
    }
}
