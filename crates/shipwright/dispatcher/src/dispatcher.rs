//! The agent dispatcher.
//!
//! Bridges workflow stages and agents: turns a stage into a typed task,
//! publishes it on the agent type's durable stream, and classifies the
//! result that comes back. It owns task state; workflow state belongs to
//! the orchestrator.

use crate::error::{DispatchError, Result};
use crate::routing::agent_for_stage;
use crate::store::TaskStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shipwright_bus::{BusError, MessageBus};
use shipwright_resilience::{BreakerError, BreakerRegistry, Retry, RetryPolicy};
use shipwright_types::{
    AgentResult, ArtifactRef, Channel, CorrelationId, Envelope, MessageType, Stage, Task,
    TaskAction, TaskId, TaskPayload, TaskPriority, TaskStatus, Workflow, WorkflowId,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Dispatcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub default_timeout_ms: u64,
    pub max_retries: u32,
    pub priority: TaskPriority,
    /// Branch integration tasks merge into
    pub target_branch: String,
    /// Environment deploy tasks release to
    pub environment: String,
    /// Retry policy for publishing onto task streams; set from the service's
    /// `retry` section
    #[serde(skip)]
    pub publish_retry: RetryPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 300_000,
            max_retries: 3,
            priority: TaskPriority::Normal,
            target_branch: "main".to_string(),
            environment: "staging".to_string(),
            publish_retry: RetryPolicy::default(),
        }
    }
}

/// How a validated result affects its task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultOutcome {
    Succeeded,
    /// The agent ran and reported failure. `retryable` means the agent
    /// flagged it so and the task still has retries left.
    BusinessFailure { retryable: bool },
    /// The task was already settled (completed, failed or timed out).
    Stale,
}

#[derive(Debug, Clone)]
pub struct ClassifiedResult {
    pub task: Task,
    pub result: AgentResult,
    pub outcome: ResultOutcome,
}

/// What one timeout sweep did.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Re-sent with the same envelope id
    pub redispatched: Vec<Task>,
    /// Out of retries; now `timeout`
    pub timed_out: Vec<Task>,
    pub publish_failures: Vec<(TaskId, String)>,
}

pub struct AgentDispatcher {
    bus: Arc<MessageBus>,
    store: Arc<dyn TaskStore>,
    breakers: Arc<BreakerRegistry>,
    config: DispatchConfig,
}

impl AgentDispatcher {
    pub fn new(
        bus: Arc<MessageBus>,
        store: Arc<dyn TaskStore>,
        breakers: Arc<BreakerRegistry>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            bus,
            store,
            breakers,
            config,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    // ── Dispatch ────────────────────────────────────────────────────

    /// Create a task for `stage` of `workflow` and publish it.
    ///
    /// The task is stored as `dispatched` before it is published so a fast
    /// result always finds it.
    pub async fn dispatch(&self, workflow: &Workflow, stage: Stage) -> Result<Task> {
        let agent = agent_for_stage(stage).ok_or(DispatchError::Unrouted(stage))?;
        let payload = TaskPayload {
            work: self.build_action(workflow, stage),
            context: workflow.stage_outputs.clone(),
            clarifications: workflow.answers_for(stage),
        };
        let task = Task::new(workflow.workflow_id, stage, agent, payload)
            .with_priority(self.config.priority)
            .with_limits(self.config.max_retries, self.config.default_timeout_ms)
            .with_tenant(workflow.tenant_id.clone());

        let mut envelope = self.bus.codec().wrap(
            MessageType::TaskDispatch,
            task,
            Some(workflow.trace_id()),
            workflow.tenant_id.clone(),
        )?;
        envelope.payload.mark_dispatched(envelope.id);
        self.store.insert(envelope.payload.clone()).await?;

        match self.publish_task(&envelope).await {
            Ok(entry_id) => {
                info!(
                    workflow_id = %workflow.workflow_id,
                    task_id = %envelope.payload.task_id,
                    envelope_id = %envelope.id,
                    trace_id = %envelope.correlation_id,
                    stage = %stage,
                    agent_type = %agent,
                    entry_id = %entry_id,
                    "Task dispatched"
                );
                Ok(envelope.payload)
            }
            Err(e) => {
                let mut task = envelope.payload;
                task.mark_failed(e.to_string());
                self.store.update(task).await?;
                Err(e)
            }
        }
    }

    fn build_action(&self, workflow: &Workflow, stage: Stage) -> TaskAction {
        let artifacts: Vec<ArtifactRef> = workflow
            .stage_outputs
            .values()
            .flat_map(|o| o.artifacts.iter().cloned())
            .collect();

        match stage {
            Stage::Scaffold => TaskAction::ScaffoldProject {
                requirements: workflow.requirements.clone(),
                template: None,
            },
            Stage::Validate => TaskAction::ValidateArtifacts { artifacts },
            Stage::Test => TaskAction::RunTests {
                artifacts,
                suites: Vec::new(),
            },
            Stage::Integrate => TaskAction::IntegrateChanges {
                artifacts,
                target_branch: self.config.target_branch.clone(),
            },
            Stage::Deploy => TaskAction::DeployRelease {
                artifacts,
                environment: self.config.environment.clone(),
            },
        }
    }

    /// Append to the task stream behind the stream's breaker, with retry.
    async fn publish_task(&self, envelope: &Envelope<Task>) -> Result<String> {
        let stream = Channel::Tasks(envelope.payload.agent_type).name();
        let breaker = self.breakers.get(&format!("publish:{}", stream));

        let bus = self.bus.as_ref();
        let breaker = breaker.as_ref();
        let stream_name = stream.as_str();

        Retry::new(self.config.publish_retry.clone())
            .retry_if(|e: &BreakerError<BusError>| match e {
                BreakerError::Open { .. } => true,
                BreakerError::Inner(inner) => inner.class().is_retryable(),
            })
            .run(|_| async move {
                breaker
                    .call(|| bus.publish_durable(stream_name, envelope))
                    .await
            })
            .await
            .map_err(|e| DispatchError::Publish {
                stream: stream.clone(),
                attempts: e.attempts(),
                message: e.to_string(),
            })
    }

    // ── Results ─────────────────────────────────────────────────────

    /// Validate an `agent.result` envelope and apply it to its task.
    ///
    /// Invalid results are compliance breaches: logged at error level and
    /// returned as [`DispatchError::Protocol`], never coerced.
    pub async fn on_result(&self, envelope: &Envelope<Value>) -> Result<ClassifiedResult> {
        if envelope.message_type != MessageType::AgentResult {
            return Err(self.breach(
                envelope,
                vec![format!("expected agent.result, got {}", envelope.message_type)],
            ));
        }
        if let Err(e) = self
            .bus
            .codec()
            .registry()
            .validate_payload(MessageType::AgentResult, &envelope.payload)
        {
            return Err(self.breach(envelope, vec![e.to_string()]));
        }
        let result: AgentResult = serde_json::from_value(envelope.payload.clone())
            .map_err(|e| self.breach(envelope, vec![e.to_string()]))?;

        let mut task = self
            .store
            .get(&result.task_id)
            .await?
            .ok_or(DispatchError::UnknownTask(result.task_id))?;

        let mut problems = Vec::new();
        if task.workflow_id != result.workflow_id {
            problems.push(format!(
                "task {} belongs to workflow {}, result names {}",
                task.task_id, task.workflow_id, result.workflow_id
            ));
        }
        if task.agent_type != result.agent_type {
            problems.push(format!(
                "task {} was dispatched to {}, result comes from {}",
                task.task_id, task.agent_type, result.agent_type
            ));
        }
        if !problems.is_empty() {
            return Err(self.breach(envelope, problems));
        }

        if task.status != TaskStatus::Dispatched {
            debug!(
                task_id = %task.task_id,
                status = ?task.status,
                envelope_id = %envelope.id,
                "Result for settled task"
            );
            return Ok(ClassifiedResult {
                task,
                result,
                outcome: ResultOutcome::Stale,
            });
        }

        let outcome = if result.success {
            task.mark_completed();
            ResultOutcome::Succeeded
        } else {
            let error = result.error.as_ref();
            let message = error
                .map(|e| format!("{}: {}", e.code, e.message))
                .unwrap_or_else(|| "agent reported failure".to_string());
            task.mark_failed(message);
            ResultOutcome::BusinessFailure {
                retryable: error.is_some_and(|e| e.retryable) && task.can_retry(),
            }
        };
        self.store.update(task.clone()).await?;

        info!(
            workflow_id = %task.workflow_id,
            task_id = %task.task_id,
            agent_id = %result.agent_id.as_str(),
            trace_id = %envelope.correlation_id,
            stage = %task.stage,
            outcome = ?outcome,
            duration_ms = result.metrics.duration_ms,
            "Agent result classified"
        );

        Ok(ClassifiedResult {
            task,
            result,
            outcome,
        })
    }

    fn breach(&self, envelope: &Envelope<Value>, problems: Vec<String>) -> DispatchError {
        error!(
            envelope_id = %envelope.id,
            trace_id = %envelope.correlation_id,
            source = %envelope.source,
            message_type = %envelope.message_type,
            problems = ?problems,
            "Compliance breach: invalid agent result"
        );
        DispatchError::Protocol(problems.join("; "))
    }

    // ── Retries and timeouts ────────────────────────────────────────

    /// Re-send every overdue dispatched task that has retries left, with
    /// the same envelope id and `attempts + 1`. Tasks out of retries move
    /// to `timeout`.
    pub async fn sweep_timeouts(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        for mut task in self.store.list_by_status(TaskStatus::Dispatched).await? {
            if !task.is_overdue(now) {
                continue;
            }

            if !task.can_retry() {
                task.mark_timeout();
                self.store.update(task.clone()).await?;
                warn!(
                    workflow_id = %task.workflow_id,
                    task_id = %task.task_id,
                    stage = %task.stage,
                    retries = task.retry_count,
                    "Task timed out with no retries left"
                );
                report.timed_out.push(task);
                continue;
            }

            let reason = format!("no result within {}ms", task.timeout_ms);
            task.mark_retried(reason.as_str());
            self.store.update(task.clone()).await?;

            let envelope = self.resend_envelope(&task, &reason)?;
            match self.publish_task(&envelope).await {
                Ok(_) => {
                    warn!(
                        workflow_id = %task.workflow_id,
                        task_id = %task.task_id,
                        envelope_id = %envelope.id,
                        stage = %task.stage,
                        retry = task.retry_count,
                        "Task re-dispatched after timeout"
                    );
                    report.redispatched.push(task);
                }
                Err(e) => {
                    error!(task_id = %task.task_id, error = %e, "Re-dispatch failed");
                    report.publish_failures.push((task.task_id, e.to_string()));
                }
            }
        }

        Ok(report)
    }

    /// Same logical message as the original dispatch: same envelope id,
    /// `attempts` equal to the task's retry count.
    fn resend_envelope(&self, task: &Task, reason: &str) -> Result<Envelope<Task>> {
        let codec = self.bus.codec();
        let mut envelope = codec.wrap(
            MessageType::TaskDispatch,
            task.clone(),
            Some(CorrelationId::from(task.workflow_id)),
            task.tenant_id.clone(),
        )?;
        if let Some(id) = task.envelope_id {
            envelope.id = id;
        }
        envelope.meta.attempts = task.retry_count.saturating_sub(1);
        Ok(codec.retry(envelope, reason))
    }

    /// Retry a task after a retryable business failure.
    ///
    /// The agent already consumed the original envelope, so this is a new
    /// logical message with a fresh envelope id; the task id is unchanged.
    pub async fn redispatch(&self, task_id: &TaskId, reason: &str) -> Result<Task> {
        let mut task = self
            .store
            .get(task_id)
            .await?
            .ok_or(DispatchError::UnknownTask(*task_id))?;
        if !task.can_retry() {
            return Err(DispatchError::RetriesExhausted {
                task_id: *task_id,
                retries: task.retry_count,
            });
        }
        task.mark_retried(reason);

        let correlation = CorrelationId::from(task.workflow_id);
        let tenant_id = task.tenant_id.clone();
        let mut envelope =
            self.bus
                .codec()
                .wrap(MessageType::TaskDispatch, task, Some(correlation), tenant_id)?;
        envelope.payload.envelope_id = Some(envelope.id);
        self.store.update(envelope.payload.clone()).await?;
        self.publish_task(&envelope).await?;

        info!(
            workflow_id = %envelope.payload.workflow_id,
            task_id = %task_id,
            envelope_id = %envelope.id,
            retry = envelope.payload.retry_count,
            reason = %reason,
            "Task re-dispatched"
        );
        Ok(envelope.payload)
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub async fn task(&self, task_id: &TaskId) -> Result<Option<Task>> {
        self.store.get(task_id).await
    }

    pub async fn tasks_for_workflow(&self, workflow_id: &WorkflowId) -> Result<Vec<Task>> {
        self.store.list_for_workflow(workflow_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryTaskStore;
    use shipwright_bus::ConsumerConfig;
    use shipwright_kv::{IdempotencyGuard, InMemoryKvStore, KeyValueStore, DEFAULT_MARKER_TTL};
    use shipwright_resilience::{CircuitBreakerConfig, CircuitState};
    use shipwright_schema::{EnvelopeCodec, SchemaRegistry, DEFAULT_COMPATIBILITY_WINDOW};
    use shipwright_types::{AgentError, AgentId, AgentType, StageOutput, WorkflowType};

    struct Harness {
        dispatcher: AgentDispatcher,
        bus: Arc<MessageBus>,
        breakers: Arc<BreakerRegistry>,
    }

    fn harness(config: DispatchConfig) -> Harness {
        let kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryKvStore::new());
        let registry = SchemaRegistry::with_defaults(DEFAULT_COMPATIBILITY_WINDOW);
        let codec = EnvelopeCodec::new(Arc::new(registry), "orchestrator");
        let guard = IdempotencyGuard::new(kv, DEFAULT_MARKER_TTL);
        let bus = Arc::new(MessageBus::in_memory(codec, guard, ConsumerConfig::default()));
        let breakers = Arc::new(BreakerRegistry::new(CircuitBreakerConfig::default()));
        let dispatcher = AgentDispatcher::new(
            bus.clone(),
            Arc::new(InMemoryTaskStore::new()),
            breakers.clone(),
            config,
        );
        Harness {
            dispatcher,
            bus,
            breakers,
        }
    }

    fn test_config() -> DispatchConfig {
        DispatchConfig {
            default_timeout_ms: 1_000,
            max_retries: 1,
            publish_retry: RetryPolicy::immediate(2),
            ..Default::default()
        }
    }

    async fn published_tasks(bus: &MessageBus, agent: AgentType) -> Vec<Envelope<Task>> {
        let entries = bus
            .streams()
            .range(&Channel::Tasks(agent).name())
            .await
            .unwrap();
        entries
            .iter()
            .map(|e| bus.codec().decode::<Task>(&e.payload).unwrap())
            .collect()
    }

    fn result_envelope(bus: &MessageBus, result: AgentResult) -> Envelope<Value> {
        let correlation = CorrelationId::from(result.workflow_id);
        bus.codec()
            .wrap(MessageType::AgentResult, result, Some(correlation), None)
            .unwrap()
            .map_payload(|r| serde_json::to_value(r).unwrap())
    }

    fn success_for(task: &Task) -> AgentResult {
        AgentResult::succeeded(
            task.task_id,
            task.workflow_id,
            AgentId::new("agent-1"),
            task.agent_type,
            StageOutput::with_summary("ok"),
        )
    }

    #[tokio::test]
    async fn test_dispatch_persists_and_publishes() {
        let h = harness(test_config());
        let workflow = Workflow::new(WorkflowType::Delivery, "todo app").with_tenant("acme");

        let task = h.dispatcher.dispatch(&workflow, Stage::Scaffold).await.unwrap();
        assert_eq!(task.status, TaskStatus::Dispatched);
        assert_eq!(task.agent_type, AgentType::Scaffolder);
        assert_eq!(task.tenant_id.as_deref(), Some("acme"));

        let stored = h.dispatcher.task(&task.task_id).await.unwrap().unwrap();
        assert_eq!(stored, task);

        let published = published_tasks(&h.bus, AgentType::Scaffolder).await;
        assert_eq!(published.len(), 1);
        assert_eq!(Some(published[0].id), task.envelope_id);
        assert_eq!(published[0].correlation_id, workflow.trace_id());
        assert_eq!(published[0].tenant_id.as_deref(), Some("acme"));
        assert!(matches!(
            &published[0].payload.payload.work,
            TaskAction::ScaffoldProject { requirements, .. } if requirements == "todo app"
        ));
    }

    #[tokio::test]
    async fn test_later_stages_receive_prior_artifacts() {
        let h = harness(test_config());
        let mut workflow = Workflow::new(WorkflowType::Delivery, "todo app");
        workflow.record_output(
            Stage::Scaffold,
            StageOutput::with_summary("scaffolded").with_artifact(ArtifactRef::new("repo", "git://x")),
        );

        let task = h.dispatcher.dispatch(&workflow, Stage::Integrate).await.unwrap();
        match &task.payload.work {
            TaskAction::IntegrateChanges {
                artifacts,
                target_branch,
            } => {
                assert_eq!(artifacts.len(), 1);
                assert_eq!(target_branch, "main");
            }
            other => panic!("unexpected action {:?}", other),
        }
        assert!(task.payload.context.contains_key(&Stage::Scaffold));
    }

    #[tokio::test]
    async fn test_open_breaker_fails_dispatch_and_marks_task() {
        let h = harness(test_config());
        let stream = Channel::Tasks(AgentType::Scaffolder).name();
        h.breakers
            .get(&format!("publish:{}", stream))
            .force_state(CircuitState::Open);

        let workflow = Workflow::new(WorkflowType::Delivery, "todo app");
        let err = h
            .dispatcher
            .dispatch(&workflow, Stage::Scaffold)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Publish { attempts: 2, .. }));

        let tasks = h
            .dispatcher
            .tasks_for_workflow(&workflow.workflow_id)
            .await
            .unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].status, TaskStatus::Failed);
        assert!(published_tasks(&h.bus, AgentType::Scaffolder).await.is_empty());
    }

    #[tokio::test]
    async fn test_success_result_completes_task() {
        let h = harness(test_config());
        let workflow = Workflow::new(WorkflowType::Delivery, "todo app");
        let task = h.dispatcher.dispatch(&workflow, Stage::Scaffold).await.unwrap();

        let envelope = result_envelope(&h.bus, success_for(&task));
        let classified = h.dispatcher.on_result(&envelope).await.unwrap();
        assert_eq!(classified.outcome, ResultOutcome::Succeeded);
        assert_eq!(classified.task.status, TaskStatus::Completed);

        // A second result for the same task is stale.
        let again = h.dispatcher.on_result(&envelope).await.unwrap();
        assert_eq!(again.outcome, ResultOutcome::Stale);
    }

    #[tokio::test]
    async fn test_failure_result_retryable_only_with_budget() {
        let h = harness(test_config());
        let workflow = Workflow::new(WorkflowType::Delivery, "todo app");
        let task = h.dispatcher.dispatch(&workflow, Stage::Scaffold).await.unwrap();

        let failure = AgentResult::failed(
            task.task_id,
            task.workflow_id,
            AgentId::new("agent-1"),
            task.agent_type,
            AgentError {
                code: "E_FLAKY".into(),
                message: "registry unreachable".into(),
                retryable: true,
            },
        );
        let classified = h
            .dispatcher
            .on_result(&result_envelope(&h.bus, failure.clone()))
            .await
            .unwrap();
        assert_eq!(
            classified.outcome,
            ResultOutcome::BusinessFailure { retryable: true }
        );
        assert_eq!(
            classified.task.last_error.as_deref(),
            Some("E_FLAKY: registry unreachable")
        );

        let retried = h
            .dispatcher
            .redispatch(&task.task_id, "E_FLAKY")
            .await
            .unwrap();
        assert_eq!(retried.retry_count, 1);
        assert_eq!(retried.status, TaskStatus::Dispatched);
        assert_ne!(retried.envelope_id, task.envelope_id);
        assert_eq!(published_tasks(&h.bus, AgentType::Scaffolder).await.len(), 2);

        // Budget spent: the next failure is terminal.
        let classified = h
            .dispatcher
            .on_result(&result_envelope(&h.bus, failure))
            .await
            .unwrap();
        assert_eq!(
            classified.outcome,
            ResultOutcome::BusinessFailure { retryable: false }
        );
        let err = h
            .dispatcher
            .redispatch(&task.task_id, "again")
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::RetriesExhausted { retries: 1, .. }));
    }

    #[tokio::test]
    async fn test_invalid_result_is_protocol_error() {
        let h = harness(test_config());
        let workflow = Workflow::new(WorkflowType::Delivery, "todo app");
        let task = h.dispatcher.dispatch(&workflow, Stage::Scaffold).await.unwrap();

        let mut bad = success_for(&task);
        bad.confidence = Some(2.0);
        let err = h
            .dispatcher
            .on_result(&result_envelope(&h.bus, bad))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Protocol(_)));

        let stored = h.dispatcher.task(&task.task_id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Dispatched);
    }

    #[tokio::test]
    async fn test_result_from_wrong_agent_type_is_rejected() {
        let h = harness(test_config());
        let workflow = Workflow::new(WorkflowType::Delivery, "todo app");
        let task = h.dispatcher.dispatch(&workflow, Stage::Scaffold).await.unwrap();

        let mut result = success_for(&task);
        result.agent_type = AgentType::Deployer;
        let err = h
            .dispatcher
            .on_result(&result_envelope(&h.bus, result))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Protocol(msg) if msg.contains("deployer")));
    }

    #[tokio::test]
    async fn test_result_for_unknown_task() {
        let h = harness(test_config());
        let workflow = Workflow::new(WorkflowType::Delivery, "todo app");
        let task = h.dispatcher.dispatch(&workflow, Stage::Scaffold).await.unwrap();

        let mut result = success_for(&task);
        result.task_id = TaskId::generate();
        let err = h
            .dispatcher
            .on_result(&result_envelope(&h.bus, result))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnknownTask(_)));
        assert!(err.class().is_retryable());
    }

    #[tokio::test]
    async fn test_sweep_resends_same_envelope_then_times_out() {
        let h = harness(test_config());
        let workflow = Workflow::new(WorkflowType::Delivery, "todo app");
        let task = h.dispatcher.dispatch(&workflow, Stage::Scaffold).await.unwrap();

        let report = h.dispatcher.sweep_timeouts(Utc::now()).await.unwrap();
        assert!(report.redispatched.is_empty());
        assert!(report.timed_out.is_empty());

        let later = Utc::now() + chrono::Duration::seconds(5);
        let report = h.dispatcher.sweep_timeouts(later).await.unwrap();
        assert_eq!(report.redispatched.len(), 1);
        assert_eq!(report.redispatched[0].retry_count, 1);

        let published = published_tasks(&h.bus, AgentType::Scaffolder).await;
        assert_eq!(published.len(), 2);
        assert_eq!(published[1].id, published[0].id);
        assert_eq!(published[1].meta.attempts, 1);
        assert!(published[1].meta.last_error.is_some());

        let later = Utc::now() + chrono::Duration::seconds(10);
        let report = h.dispatcher.sweep_timeouts(later).await.unwrap();
        assert_eq!(report.timed_out.len(), 1);
        let stored = h.dispatcher.task(&task.task_id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Timeout);
    }
}
