//! End-to-end orchestration over the in-memory bus with fake agents.

mod common;

use common::*;
use shipwright_orchestrator::{OrchestratorError, SettleOutcome, EXIT_STILL_RUNNING};
use shipwright_resilience::CircuitState;
use shipwright_types::{
    dead_letter_stream, AgentType, Channel, ClarificationRequest, DecisionCategory, ErrorClass,
    Stage, TaskStatus, WorkflowEvent, WorkflowEventKind, WorkflowStatus, WorkflowType,
};
use shipwright_workflow::GuardRejection;
use std::time::Duration;

#[tokio::test]
async fn test_prototype_runs_to_completion() {
    let service = started(test_config()).await;
    let agent = FakeAgent::spawn(&service, |task, _| Some(success(task))).await;

    let id = service
        .submit_workflow(WorkflowType::Prototype, "todo app", None)
        .await
        .unwrap();
    let outcome = service.await_settled(id, SETTLE).await.unwrap();

    let SettleOutcome::Completed(view) = outcome else {
        panic!("expected completion, got {:?}", outcome);
    };
    assert_eq!(view.progress_percent, 100);
    assert_eq!(
        view.completed_stages,
        vec![Stage::Scaffold, Stage::Validate, Stage::Test]
    );
    assert_eq!(view.active_task_id, None);
    assert_eq!(view.exit_code(), 0);
    assert_eq!(agent.calls(), 3);

    let tasks = service.dispatcher().tasks_for_workflow(&id).await.unwrap();
    assert_eq!(tasks.len(), 3);
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Completed));

    service.shutdown().await;
}

#[tokio::test]
async fn test_later_stages_see_earlier_outputs() {
    let service = started(test_config()).await;
    FakeAgent::spawn(&service, |task, _| {
        if task.stage == Stage::Test && !task.payload.context.contains_key(&Stage::Scaffold) {
            return Some(failure(task, "E_CONTEXT", false));
        }
        Some(success(task))
    })
    .await;

    let id = service
        .submit_workflow(WorkflowType::Prototype, "todo app", None)
        .await
        .unwrap();
    let outcome = service.await_settled(id, SETTLE).await.unwrap();
    assert!(matches!(outcome, SettleOutcome::Completed(_)), "{:?}", outcome);

    service.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_results_advance_once() {
    let service = started(test_config()).await;
    FakeAgent::spawn_with(&service, |task, _| Some(success(task)), true).await;

    let id = service
        .submit_workflow(WorkflowType::Prototype, "todo app", None)
        .await
        .unwrap();
    let outcome = service.await_settled(id, SETTLE).await.unwrap();
    assert!(matches!(outcome, SettleOutcome::Completed(_)), "{:?}", outcome);

    // Give the second copies time to drain.
    eventually(|| {
        let bus = service.bus();
        async move { bus.streams().range(&Channel::Results.name()).await.unwrap().len() == 6 }
    })
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let tasks = service.dispatcher().tasks_for_workflow(&id).await.unwrap();
    assert_eq!(tasks.len(), 3);
    let view = service.workflow_status(id).await.unwrap();
    assert_eq!(view.status, WorkflowStatus::Completed);
    assert_eq!(view.completed_stages.len(), 3);

    service.shutdown().await;
}

#[tokio::test]
async fn test_result_for_settled_task_is_discarded() {
    let service = started(test_config()).await;
    let id = service
        .submit_workflow(WorkflowType::Prototype, "todo app", None)
        .await
        .unwrap();
    let first = active_task(&service, id).await;

    reply(&service, id, success(&first)).await;
    eventually(|| {
        let service = service.clone();
        async move { service.workflow_status(id).await.unwrap().current_stage == Stage::Validate }
    })
    .await;

    // A late, separately-enveloped failure for the finished scaffold task.
    reply(&service, id, failure(&first, "E_LATE", false)).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let view = service.workflow_status(id).await.unwrap();
    assert_eq!(view.status, WorkflowStatus::Running);
    assert_eq!(view.current_stage, Stage::Validate);
    assert_eq!(view.completed_stages, vec![Stage::Scaffold]);

    service.shutdown().await;
}

#[tokio::test]
async fn test_decision_gate_pauses_until_approved() {
    let mut config = test_config();
    config.gates = config
        .gates
        .require_approval(Stage::Deploy, DecisionCategory::ProductionRelease)
        .with_threshold(DecisionCategory::ProductionRelease, 0.95);
    let service = started(config).await;
    FakeAgent::spawn(&service, |task, _| Some(success(task).with_confidence(0.8))).await;

    let id = service
        .submit_workflow(WorkflowType::Release, "ship v2", None)
        .await
        .unwrap();
    let outcome = service.await_settled(id, SETTLE).await.unwrap();
    let SettleOutcome::NeedsDecision(view) = outcome else {
        panic!("expected a decision gate, got {:?}", outcome);
    };
    assert_eq!(view.exit_code(), 2);
    let decision = view.decision.expect("pending decision");
    assert_eq!(decision.stage, Stage::Deploy);
    assert_eq!(decision.category, DecisionCategory::ProductionRelease);
    assert_eq!(decision.confidence, Some(0.8));
    assert_eq!(decision.threshold, Some(0.95));

    let approved = service
        .approve_decision(id, decision.decision_id)
        .await
        .unwrap();
    assert_eq!(approved.status, WorkflowStatus::Completed);
    assert_eq!(approved.progress_percent, 100);

    service.shutdown().await;
}

#[tokio::test]
async fn test_rejected_decision_fails_workflow() {
    let mut config = test_config();
    config.gates = config
        .gates
        .require_approval(Stage::Integrate, DecisionCategory::ArchitecturalChange);
    let service = started(config).await;
    FakeAgent::spawn(&service, |task, _| Some(success(task).with_confidence(1.0))).await;

    let id = service
        .submit_workflow(WorkflowType::Release, "ship v2", None)
        .await
        .unwrap();
    let SettleOutcome::NeedsDecision(view) = service.await_settled(id, SETTLE).await.unwrap()
    else {
        panic!("expected a decision gate");
    };
    let decision = view.decision.unwrap();
    // No threshold configured: even full confidence waits for a human.
    assert_eq!(decision.threshold, None);

    let stale = service
        .approve_decision(id, shipwright_types::DecisionId::generate())
        .await
        .unwrap_err();
    assert!(matches!(
        stale.rejection(),
        Some(GuardRejection::DecisionMismatch { .. })
    ));

    let rejected = service
        .reject_decision(id, decision.decision_id, Some("needs review".into()))
        .await
        .unwrap();
    assert_eq!(rejected.status, WorkflowStatus::Failed);
    let failure = rejected.failure.unwrap();
    assert_eq!(failure.class, ErrorClass::BusinessFailure);
    assert!(failure.message.contains("needs review"));

    service.shutdown().await;
}

#[tokio::test]
async fn test_clarification_reruns_stage_with_answers() {
    let service = started(test_config()).await;
    let agent = FakeAgent::spawn(&service, |task, _| {
        if task.stage == Stage::Scaffold && task.payload.clarifications.is_empty() {
            return Some(success(task).with_clarification(ClarificationRequest {
                questions: vec!["Which database?".into()],
                requirement_confidence: Some(0.4),
            }));
        }
        Some(success(task))
    })
    .await;

    let id = service
        .submit_workflow(WorkflowType::Prototype, "todo app", None)
        .await
        .unwrap();
    let SettleOutcome::NeedsClarification(view) =
        service.await_settled(id, SETTLE).await.unwrap()
    else {
        panic!("expected a clarification");
    };
    assert_eq!(view.exit_code(), 3);
    let pending = view.clarification.unwrap();
    assert_eq!(pending.questions, vec!["Which database?".to_string()]);
    assert!(view.completed_stages.is_empty());

    service
        .complete_clarification(id, pending.clarification_id, vec!["postgres".into()])
        .await
        .unwrap();
    let outcome = service.await_settled(id, SETTLE).await.unwrap();
    assert!(matches!(outcome, SettleOutcome::Completed(_)), "{:?}", outcome);
    // scaffold twice, then validate and test
    assert_eq!(agent.calls(), 4);

    service.shutdown().await;
}

#[tokio::test]
async fn test_retryable_failure_redispatches_stage() {
    let service = started(test_config()).await;
    let agent = FakeAgent::spawn(&service, |task, _| {
        if task.stage == Stage::Validate && task.retry_count == 0 {
            return Some(failure(task, "E_FLAKY", true));
        }
        Some(success(task))
    })
    .await;

    let id = service
        .submit_workflow(WorkflowType::Prototype, "todo app", None)
        .await
        .unwrap();
    let outcome = service.await_settled(id, SETTLE).await.unwrap();
    assert!(matches!(outcome, SettleOutcome::Completed(_)), "{:?}", outcome);
    assert_eq!(agent.calls(), 4);

    let tasks = service.dispatcher().tasks_for_workflow(&id).await.unwrap();
    let validate = tasks.iter().find(|t| t.stage == Stage::Validate).unwrap();
    assert_eq!(validate.retry_count, 1);

    service.shutdown().await;
}

#[tokio::test]
async fn test_non_retryable_failure_fails_workflow() {
    let service = started(test_config()).await;
    FakeAgent::spawn(&service, |task, _| {
        if task.stage == Stage::Validate {
            return Some(failure(task, "E_LINT", false));
        }
        Some(success(task))
    })
    .await;

    let id = service
        .submit_workflow(WorkflowType::Prototype, "todo app", None)
        .await
        .unwrap();
    let SettleOutcome::Failed(view) = service.await_settled(id, SETTLE).await.unwrap() else {
        panic!("expected failure");
    };
    assert_eq!(view.exit_code(), 1);
    let failure = view.failure.unwrap();
    assert_eq!(failure.class, ErrorClass::BusinessFailure);
    assert_eq!(failure.stage, Stage::Validate);
    assert!(failure.message.starts_with("E_LINT"));

    service.shutdown().await;
}

#[tokio::test]
async fn test_invalid_result_is_dead_lettered() {
    let service = started(test_config()).await;
    let id = service
        .submit_workflow(WorkflowType::Prototype, "todo app", None)
        .await
        .unwrap();
    let task = active_task(&service, id).await;

    // Claims to come from the wrong agent type.
    let mut forged = success(&task);
    forged.agent_type = AgentType::Deployer;
    reply(&service, id, forged).await;

    let dead_letters = dead_letter_stream(&Channel::Results.name());
    eventually(|| {
        let bus = service.bus();
        let dead_letters = dead_letters.clone();
        async move { !bus.streams().range(&dead_letters).await.unwrap().is_empty() }
    })
    .await;

    let view = service.workflow_status(id).await.unwrap();
    assert_eq!(view.status, WorkflowStatus::Running);
    assert_eq!(view.current_stage, Stage::Scaffold);
    assert!(view.completed_stages.is_empty());

    service.shutdown().await;
}

#[tokio::test]
async fn test_open_breaker_fails_workflow() {
    let service = started(test_config()).await;
    service
        .breakers()
        .get(&format!("publish:{}", Channel::Tasks(AgentType::Scaffolder).name()))
        .force_state(CircuitState::Open);

    let id = service
        .submit_workflow(WorkflowType::Prototype, "todo app", None)
        .await
        .unwrap();
    let view = service.workflow_status(id).await.unwrap();
    assert_eq!(view.status, WorkflowStatus::Failed);
    assert_eq!(view.failure.unwrap().class, ErrorClass::ExhaustedRetry);

    service.shutdown().await;
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let service = started(test_config()).await;
    let err = service.start().await.unwrap_err();
    assert!(matches!(err, OrchestratorError::AlreadyStarted));
    service.shutdown().await;
}

#[tokio::test]
async fn test_cancel_discards_late_results() {
    let service = started(test_config()).await;
    let id = service
        .submit_workflow(WorkflowType::Prototype, "todo app", None)
        .await
        .unwrap();
    let task = active_task(&service, id).await;

    let cancelled = service
        .cancel_workflow(id, Some("operator abort".into()))
        .await
        .unwrap();
    assert_eq!(cancelled.status, WorkflowStatus::Cancelled);
    assert_eq!(cancelled.exit_code(), 4);

    reply(&service, id, success(&task)).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let view = service.workflow_status(id).await.unwrap();
    assert_eq!(view.status, WorkflowStatus::Cancelled);
    assert!(view.completed_stages.is_empty());

    let again = service.cancel_workflow(id, None).await.unwrap_err();
    assert!(matches!(again.rejection(), Some(GuardRejection::Terminal(_))));

    service.shutdown().await;
}

#[tokio::test]
async fn test_paused_workflow_holds_next_dispatch() {
    let service = started(test_config()).await;
    let id = service
        .submit_workflow(WorkflowType::Prototype, "todo app", None)
        .await
        .unwrap();
    let task = active_task(&service, id).await;

    let paused = service.pause_workflow(id).await.unwrap();
    assert_eq!(paused.status, WorkflowStatus::Paused);
    assert_eq!(paused.exit_code(), EXIT_STILL_RUNNING);

    reply(&service, id, success(&task)).await;
    eventually(|| {
        let service = service.clone();
        async move {
            service.workflow_status(id).await.unwrap().completed_stages == vec![Stage::Scaffold]
        }
    })
    .await;
    let view = service.workflow_status(id).await.unwrap();
    assert_eq!(view.status, WorkflowStatus::Paused);
    assert_eq!(view.active_task_id, None);
    assert_eq!(service.dispatcher().tasks_for_workflow(&id).await.unwrap().len(), 1);

    let resumed = service.resume_workflow(id).await.unwrap();
    assert_eq!(resumed.status, WorkflowStatus::Running);
    assert_eq!(resumed.current_stage, Stage::Validate);
    assert!(resumed.active_task_id.is_some());

    service.shutdown().await;
}

#[tokio::test]
async fn test_timeout_sweep_resends_then_fails() {
    let mut config = test_config();
    config.dispatch.default_timeout_ms = 50;
    let service = started(config).await;
    let id = service
        .submit_workflow(WorkflowType::Prototype, "todo app", None)
        .await
        .unwrap();

    let later = || chrono::Utc::now() + chrono::Duration::seconds(1);

    let first = service.sweep_timeouts(later()).await.unwrap();
    assert_eq!(first.redispatched, 1);
    assert_eq!(first.failed_workflows, 0);
    let entries = service
        .bus()
        .streams()
        .range(&Channel::Tasks(AgentType::Scaffolder).name())
        .await
        .unwrap();
    assert_eq!(entries.len(), 2);

    let second = service.sweep_timeouts(later()).await.unwrap();
    assert_eq!(second.redispatched, 0);
    assert_eq!(second.failed_workflows, 1);

    let view = service.workflow_status(id).await.unwrap();
    assert_eq!(view.status, WorkflowStatus::Failed);
    assert_eq!(view.failure.unwrap().class, ErrorClass::ExhaustedRetry);

    service.shutdown().await;
}

#[tokio::test]
async fn test_events_published_for_lifecycle() {
    let service = started(test_config()).await;
    let mut events = service.bus().subscribe_topic(&Channel::Events.name());
    FakeAgent::spawn(&service, |task, _| Some(success(task))).await;

    let id = service
        .submit_workflow(WorkflowType::Prototype, "todo app", None)
        .await
        .unwrap();
    service.await_settled(id, SETTLE).await.unwrap();

    // The completion event goes out after the state is saved.
    let mut kinds = Vec::new();
    while kinds.last() != Some(&WorkflowEventKind::Completed) {
        let raw = tokio::time::timeout(SETTLE, events.recv())
            .await
            .expect("no completion event")
            .unwrap();
        let event = service.bus().codec().decode::<WorkflowEvent>(&raw).unwrap();
        assert_eq!(event.payload.workflow_id, id);
        kinds.push(event.payload.kind);
    }
    assert_eq!(kinds.first(), Some(&WorkflowEventKind::Started));
    assert_eq!(
        kinds
            .iter()
            .filter(|k| **k == WorkflowEventKind::StageAdvanced)
            .count(),
        2
    );

    service.shutdown().await;
}

#[tokio::test]
async fn test_await_settled_times_out_while_running() {
    let service = started(test_config()).await;
    let id = service
        .submit_workflow(WorkflowType::Prototype, "todo app", Some("acme".into()))
        .await
        .unwrap();

    let outcome = service
        .await_settled(id, Duration::from_millis(50))
        .await
        .unwrap();
    assert!(matches!(outcome, SettleOutcome::TimedOut(_)));
    assert_eq!(outcome.exit_code(), EXIT_STILL_RUNNING);

    let task = active_task(&service, id).await;
    assert_eq!(task.tenant_id.as_deref(), Some("acme"));

    let listed = service
        .list_workflows(Some(WorkflowStatus::Running))
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);

    service.shutdown().await;
}
