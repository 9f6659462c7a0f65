//! The orchestration service.
//!
//! Single writer of workflow state. One long-lived subscription on the
//! results stream serves every workflow; the handler looks the workflow up
//! by id. Every mutation of a workflow (result, operator action, sweep)
//! runs under that workflow's lock and is saved with an optimistic version
//! check.

use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::status::{SettleOutcome, StatusView};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use shipwright_bus::{HandlerError, InMemoryBus, MessageBus, MessageHandler};
use shipwright_dispatcher::{
    AgentDispatcher, ClassifiedResult, DispatchError, InMemoryTaskStore, ResultOutcome, TaskStore,
};
use shipwright_kv::{IdempotencyGuard, InMemoryKvStore, KeyValueStore};
use shipwright_resilience::BreakerRegistry;
use shipwright_schema::{EnvelopeCodec, SchemaRegistry};
use shipwright_types::{
    AgentResult, Channel, ClarificationId, DecisionId, Envelope, ErrorClass, MessageType, Stage,
    Task, TaskStatus, Workflow, WorkflowEvent, WorkflowEventKind, WorkflowId, WorkflowStatus,
    WorkflowType,
};
use shipwright_workflow::{
    GuardRejection, InMemoryWorkflowStore, Transition, WorkflowError, WorkflowStateMachine,
    WorkflowStore,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Overdue tasks re-sent
    pub redispatched: usize,
    /// Workflows failed because their task ran out of retries
    pub failed_workflows: usize,
    /// Running workflows with no task in flight that were dispatched again
    pub recovered: usize,
    pub publish_failures: usize,
}

#[derive(Clone)]
pub struct OrchestrationService {
    inner: Arc<Inner>,
}

struct Inner {
    config: OrchestratorConfig,
    bus: Arc<MessageBus>,
    dispatcher: AgentDispatcher,
    workflows: Arc<dyn WorkflowStore>,
    machine: WorkflowStateMachine,
    breakers: Arc<BreakerRegistry>,
    locks: DashMap<WorkflowId, Arc<Mutex<()>>>,
    started: AtomicBool,
    /// Bumped on every saved workflow change
    changes: watch::Sender<u64>,
    shutdown: watch::Sender<bool>,
    sweeper: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl OrchestrationService {
    pub fn new(
        config: OrchestratorConfig,
        bus: Arc<MessageBus>,
        tasks: Arc<dyn TaskStore>,
        workflows: Arc<dyn WorkflowStore>,
        breakers: Arc<BreakerRegistry>,
    ) -> Self {
        let dispatcher =
            AgentDispatcher::new(bus.clone(), tasks, breakers.clone(), config.dispatch_config());
        let machine = WorkflowStateMachine::new(config.gates.clone());
        let (changes, _) = watch::channel(0);
        let (shutdown, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                config,
                bus,
                dispatcher,
                workflows,
                machine,
                breakers,
                locks: DashMap::new(),
                started: AtomicBool::new(false),
                changes,
                shutdown,
                sweeper: std::sync::Mutex::new(None),
            }),
        }
    }

    /// Fully in-process service: in-memory KV, bus, task and workflow stores.
    pub fn in_memory(config: OrchestratorConfig) -> Self {
        let kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryKvStore::new());
        let registry = SchemaRegistry::with_defaults(config.schema.compatibility_window);
        let codec = EnvelopeCodec::new(Arc::new(registry), config.service.source.clone());
        let guard = IdempotencyGuard::new(kv.clone(), config.idempotency.ttl())
            .with_lease(config.idempotency.lease());
        let memory = Arc::new(InMemoryBus::new().with_max_len(config.service.stream_max_len));
        let bus = Arc::new(MessageBus::new(
            memory.clone(),
            memory,
            codec,
            guard,
            config.consumer.clone(),
        ));
        let breakers =
            Arc::new(BreakerRegistry::new(config.circuit_breaker.clone()).with_store(kv, None));

        Self::new(
            config,
            bus,
            Arc::new(InMemoryTaskStore::new()),
            Arc::new(InMemoryWorkflowStore::new()),
            breakers,
        )
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn bus(&self) -> Arc<MessageBus> {
        self.inner.bus.clone()
    }

    pub fn breakers(&self) -> Arc<BreakerRegistry> {
        self.inner.breakers.clone()
    }

    pub fn dispatcher(&self) -> &AgentDispatcher {
        &self.inner.dispatcher
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Subscribe to the results stream. Exactly once per service.
    pub async fn start(&self) -> Result<()> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(OrchestratorError::AlreadyStarted);
        }

        let stream = Channel::Results.name();
        let group = self.inner.config.service.results_group.as_str();
        let handler = Arc::new(ResultHandler {
            inner: self.inner.clone(),
        });
        if let Err(e) = self.inner.bus.subscribe(&stream, group, handler).await {
            self.inner.started.store(false, Ordering::SeqCst);
            return Err(e.into());
        }

        info!(stream = %stream, group = %group, "Orchestration service started");
        Ok(())
    }

    /// Run [`sweep_timeouts`](Self::sweep_timeouts) every
    /// `service.sweep_interval_ms` until shutdown.
    pub fn spawn_sweeper(&self) {
        let service = self.clone();
        let mut shutdown = self.inner.shutdown.subscribe();
        let interval = self.inner.config.service.sweep_interval();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match service.sweep_timeouts(Utc::now()).await {
                            Ok(summary) if summary != SweepSummary::default() => {
                                info!(?summary, "Timeout sweep");
                            }
                            Ok(_) => {}
                            Err(e) => error!(error = %e, "Timeout sweep failed"),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Timeout sweeper stopped");
        });

        let previous = self
            .inner
            .sweeper
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Stop the sweeper and every consumer loop after its current batch.
    pub async fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        let sweeper = self
            .inner
            .sweeper
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = sweeper {
            if let Err(e) = handle.await {
                error!(error = %e, "Sweeper task panicked");
            }
        }
        self.inner.bus.shutdown().await;
        info!("Orchestration service stopped");
    }

    // ── Operator operations ──────────────────────────────────────────

    /// Create a workflow and dispatch its first stage.
    pub async fn submit_workflow(
        &self,
        workflow_type: WorkflowType,
        requirements: impl Into<String>,
        tenant_id: Option<String>,
    ) -> Result<WorkflowId> {
        let mut workflow = Workflow::new(workflow_type, requirements);
        workflow.tenant_id = tenant_id;
        let workflow_id = workflow.workflow_id;
        self.inner.workflows.insert(workflow).await?;

        info!(
            workflow_id = %workflow_id,
            workflow_type = %workflow_type,
            "Workflow submitted"
        );
        self.inner
            .operate(workflow_id, |machine, wf| machine.start(wf))
            .await?;
        Ok(workflow_id)
    }

    pub async fn approve_decision(
        &self,
        workflow_id: WorkflowId,
        decision_id: DecisionId,
    ) -> Result<StatusView> {
        info!(workflow_id = %workflow_id, decision_id = %decision_id, "Decision approved");
        let wf = self
            .inner
            .operate(workflow_id, |machine, wf| {
                machine.approve_decision(wf, decision_id)
            })
            .await?;
        Ok(StatusView::from(&wf))
    }

    pub async fn reject_decision(
        &self,
        workflow_id: WorkflowId,
        decision_id: DecisionId,
        reason: Option<String>,
    ) -> Result<StatusView> {
        info!(workflow_id = %workflow_id, decision_id = %decision_id, reason = ?reason, "Decision rejected");
        let wf = self
            .inner
            .operate(workflow_id, |machine, wf| {
                machine.reject_decision(wf, decision_id, reason.as_deref())
            })
            .await?;
        Ok(StatusView::from(&wf))
    }

    /// Answer a pending clarification; the stage that asked runs again with
    /// the answers attached.
    pub async fn complete_clarification(
        &self,
        workflow_id: WorkflowId,
        clarification_id: ClarificationId,
        answers: Vec<String>,
    ) -> Result<StatusView> {
        info!(
            workflow_id = %workflow_id,
            clarification_id = %clarification_id,
            answers = answers.len(),
            "Clarification answered"
        );
        let wf = self
            .inner
            .operate(workflow_id, |machine, wf| {
                machine.answer_clarification(wf, clarification_id, answers.clone())
            })
            .await?;
        Ok(StatusView::from(&wf))
    }

    pub async fn cancel_workflow(
        &self,
        workflow_id: WorkflowId,
        reason: Option<String>,
    ) -> Result<StatusView> {
        let wf = self
            .inner
            .operate(workflow_id, |machine, wf| {
                machine.cancel(wf, reason.as_deref())
            })
            .await?;
        Ok(StatusView::from(&wf))
    }

    pub async fn pause_workflow(&self, workflow_id: WorkflowId) -> Result<StatusView> {
        let wf = self
            .inner
            .operate(workflow_id, |machine, wf| machine.pause(wf))
            .await?;
        Ok(StatusView::from(&wf))
    }

    pub async fn resume_workflow(&self, workflow_id: WorkflowId) -> Result<StatusView> {
        let wf = self
            .inner
            .operate(workflow_id, |machine, wf| machine.resume(wf))
            .await?;
        Ok(StatusView::from(&wf))
    }

    pub async fn workflow_status(&self, workflow_id: WorkflowId) -> Result<StatusView> {
        let wf = self.inner.load(workflow_id).await?;
        Ok(StatusView::from(&wf))
    }

    pub async fn list_workflows(&self, status: Option<WorkflowStatus>) -> Result<Vec<StatusView>> {
        let workflows = self.inner.workflows.list(status).await?;
        Ok(workflows.iter().map(StatusView::from).collect())
    }

    /// Wait until the workflow is terminal or waiting on an operator.
    ///
    /// Returns early with `NeedsDecision` / `NeedsClarification` rather than
    /// hanging on a gate, and `TimedOut` if it is still running at the
    /// deadline.
    pub async fn await_settled(
        &self,
        workflow_id: WorkflowId,
        timeout: Duration,
    ) -> Result<SettleOutcome> {
        let mut changes = self.inner.changes.subscribe();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let view = self.workflow_status(workflow_id).await?;
            if let Some(outcome) = SettleOutcome::from_view(view.clone()) {
                return Ok(outcome);
            }
            match tokio::time::timeout_at(deadline, changes.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) | Err(_) => return Ok(SettleOutcome::TimedOut(view)),
            }
        }
    }

    // ── Timeouts ─────────────────────────────────────────────────────

    /// Re-send overdue tasks, fail workflows whose task ran out of retries,
    /// re-dispatch running workflows left with no task in flight, and
    /// publish breaker snapshots.
    pub async fn sweep_timeouts(&self, now: DateTime<Utc>) -> Result<SweepSummary> {
        let report = self.inner.dispatcher.sweep_timeouts(now).await?;
        let mut summary = SweepSummary {
            redispatched: report.redispatched.len(),
            publish_failures: report.publish_failures.len(),
            ..Default::default()
        };

        for task in &report.timed_out {
            let message = task
                .last_error
                .clone()
                .unwrap_or_else(|| format!("no result within {}ms", task.timeout_ms));
            let outcome = self
                .inner
                .operate(task.workflow_id, |machine, wf| {
                    machine.stage_failed(
                        wf,
                        task.stage,
                        task.task_id,
                        ErrorClass::ExhaustedRetry,
                        format!("{} retries exhausted: {}", task.retry_count, message),
                    )
                })
                .await;
            match outcome {
                Ok(_) => summary.failed_workflows += 1,
                Err(e) => match e.rejection() {
                    Some(reason) => debug!(
                        workflow_id = %task.workflow_id,
                        task_id = %task.task_id,
                        reason = %reason,
                        "Timed-out task no longer active"
                    ),
                    None => warn!(
                        workflow_id = %task.workflow_id,
                        task_id = %task.task_id,
                        error = %e,
                        "Failed to fail workflow after task timeout"
                    ),
                },
            }
        }

        summary.recovered = self.inner.recover_stalled().await?;

        if let Err(e) = self.inner.breakers.publish_snapshots().await {
            warn!(error = %e, "Failed to publish circuit breaker snapshots");
        }

        Ok(summary)
    }
}

impl Inner {
    fn lock_for(&self, workflow_id: WorkflowId) -> Arc<Mutex<()>> {
        self.locks.entry(workflow_id).or_default().clone()
    }

    fn notify(&self) {
        self.changes.send_modify(|v| *v = v.wrapping_add(1));
    }

    async fn load(&self, workflow_id: WorkflowId) -> Result<Workflow> {
        self.workflows
            .get(&workflow_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(workflow_id).into())
    }

    /// Lock, transition, save, then carry out the transition's effects.
    async fn operate<F>(&self, workflow_id: WorkflowId, op: F) -> Result<Workflow>
    where
        F: Fn(&WorkflowStateMachine, &mut Workflow) -> std::result::Result<Transition, GuardRejection>
            + Sync,
    {
        let lock = self.lock_for(workflow_id);
        let _held = lock.lock().await;
        let (workflow, transition) = self.update(workflow_id, &op).await?;
        self.execute(workflow, transition).await
    }

    /// Read-modify-write with optimistic retry. `op` runs against a fresh
    /// copy on every attempt.
    async fn update<T, F>(&self, workflow_id: WorkflowId, op: &F) -> Result<(Workflow, T)>
    where
        F: Fn(&WorkflowStateMachine, &mut Workflow) -> std::result::Result<T, GuardRejection>
            + Sync,
    {
        let attempts = self.config.service.conflict_retries.max(1);
        for attempt in 1..=attempts {
            let mut workflow = self.load(workflow_id).await?;
            let value = op(&self.machine, &mut workflow)?;
            match self.workflows.save(workflow).await {
                Ok(saved) => {
                    self.notify();
                    return Ok((saved, value));
                }
                Err(e) if e.is_conflict() => {
                    debug!(workflow_id = %workflow_id, attempt, "Version conflict, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(OrchestratorError::ConflictRetriesExhausted {
            workflow_id,
            attempts,
        })
    }

    async fn execute(&self, workflow: Workflow, transition: Transition) -> Result<Workflow> {
        let mut workflow = workflow;
        for kind in transition.events() {
            self.publish_event(&workflow, kind).await;
        }
        for stage in transition.dispatches() {
            workflow = self.dispatch_stage(workflow, stage).await?;
        }
        if workflow.is_terminal() {
            // Terminal workflows reject every transition.
            self.locks.remove(&workflow.workflow_id);
        }
        Ok(workflow)
    }

    /// Dispatch `stage` and record the task as active. A task that cannot be
    /// published fails the workflow.
    async fn dispatch_stage(&self, workflow: Workflow, stage: Stage) -> Result<Workflow> {
        let workflow_id = workflow.workflow_id;
        match self.dispatcher.dispatch(&workflow, stage).await {
            Ok(task) => {
                let task_id = task.task_id;
                let (saved, ()) = self
                    .update(workflow_id, &|_: &WorkflowStateMachine, wf: &mut Workflow| {
                        wf.active_task_id = Some(task_id);
                        wf.updated_at = Utc::now();
                        Ok(())
                    })
                    .await?;
                Ok(saved)
            }
            Err(e @ DispatchError::Publish { .. }) => {
                error!(
                    workflow_id = %workflow_id,
                    stage = %stage,
                    error = %e,
                    "Dispatch failed"
                );
                self.fail_dispatch(workflow_id, e.to_string()).await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn fail_dispatch(&self, workflow_id: WorkflowId, message: String) -> Result<Workflow> {
        let (saved, transition) = self
            .update(workflow_id, &|machine: &WorkflowStateMachine, wf: &mut Workflow| {
                machine.dispatch_failed(wf, message.clone())
            })
            .await?;
        for kind in transition.events() {
            self.publish_event(&saved, kind).await;
        }
        self.locks.remove(&workflow_id);
        Ok(saved)
    }

    async fn publish_event(&self, workflow: &Workflow, kind: WorkflowEventKind) {
        let event = WorkflowEvent::from_workflow(workflow, kind);
        let envelope = match self.bus.codec().wrap(
            MessageType::WorkflowEvent,
            event,
            Some(workflow.trace_id()),
            workflow.tenant_id.clone(),
        ) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(workflow_id = %workflow.workflow_id, error = %e, "Failed to build workflow event");
                return;
            }
        };
        match self.bus.publish(&Channel::Events.name(), &envelope).await {
            Ok(receivers) => debug!(
                workflow_id = %workflow.workflow_id,
                kind = ?kind,
                receivers,
                "Workflow event published"
            ),
            Err(e) => warn!(
                workflow_id = %workflow.workflow_id,
                kind = ?kind,
                error = %e,
                "Failed to publish workflow event"
            ),
        }
    }

    // ── Results ──────────────────────────────────────────────────────

    async fn handle_result(&self, envelope: Envelope<Value>) -> Result<()> {
        let ClassifiedResult {
            task,
            result,
            outcome,
        } = self.dispatcher.on_result(&envelope).await?;

        let outcome = match outcome {
            ResultOutcome::Stale => match reapplicable(&task, &result) {
                Some(outcome) => outcome,
                None => {
                    debug!(
                        workflow_id = %task.workflow_id,
                        task_id = %task.task_id,
                        envelope_id = %envelope.id,
                        task_status = ?task.status,
                        "Discarding stale result"
                    );
                    return Ok(());
                }
            },
            other => other,
        };

        let lock = self.lock_for(task.workflow_id);
        let _held = lock.lock().await;

        if outcome == (ResultOutcome::BusinessFailure { retryable: true }) {
            match self.retry_stage(&task, &result).await {
                Ok(()) => return Ok(()),
                Err(OrchestratorError::Dispatch(DispatchError::RetriesExhausted { .. })) => {}
                Err(OrchestratorError::Dispatch(e @ DispatchError::Publish { .. })) => {
                    error!(
                        workflow_id = %task.workflow_id,
                        task_id = %task.task_id,
                        error = %e,
                        "Re-dispatch failed"
                    );
                    self.fail_dispatch(task.workflow_id, e.to_string()).await?;
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }

        let applied = self
            .update(task.workflow_id, &|machine: &WorkflowStateMachine, wf: &mut Workflow| {
                machine.stage_complete(wf, task.stage, task.task_id, &result)
            })
            .await;

        match applied {
            Ok((workflow, transition)) => {
                self.execute(workflow, transition).await?;
                Ok(())
            }
            Err(e) => match e.rejection() {
                Some(reason) => {
                    debug!(
                        workflow_id = %task.workflow_id,
                        task_id = %task.task_id,
                        envelope_id = %envelope.id,
                        reason = %reason,
                        "Result rejected by guard"
                    );
                    Ok(())
                }
                None => Err(e),
            },
        }
    }

    /// Re-dispatch a stage after a retryable business failure, if its task
    /// is still the workflow's active one.
    async fn retry_stage(&self, task: &Task, result: &AgentResult) -> Result<()> {
        let workflow = self.load(task.workflow_id).await?;
        if workflow.is_terminal() || workflow.active_task_id != Some(task.task_id) {
            debug!(
                workflow_id = %task.workflow_id,
                task_id = %task.task_id,
                "Retryable failure for inactive task"
            );
            return Ok(());
        }

        let reason = result
            .error
            .as_ref()
            .map(|e| format!("{}: {}", e.code, e.message))
            .unwrap_or_else(|| "retryable failure".to_string());
        let retried = self.dispatcher.redispatch(&task.task_id, &reason).await?;
        warn!(
            workflow_id = %task.workflow_id,
            task_id = %task.task_id,
            stage = %task.stage,
            retry = retried.retry_count,
            reason = %reason,
            "Stage re-dispatched after retryable failure"
        );
        Ok(())
    }

    /// Running workflows with no task in flight (a dispatch interrupted
    /// between saving the transition and recording the task).
    async fn recover_stalled(&self) -> Result<usize> {
        let mut recovered = 0;
        for candidate in self.workflows.list(Some(WorkflowStatus::Running)).await? {
            if candidate.active_task_id.is_some() {
                continue;
            }
            let lock = self.lock_for(candidate.workflow_id);
            let _held = lock.lock().await;

            let workflow = self.load(candidate.workflow_id).await?;
            if workflow.status != WorkflowStatus::Running || workflow.active_task_id.is_some() {
                continue;
            }
            let stage = workflow.current_stage;
            warn!(
                workflow_id = %workflow.workflow_id,
                stage = %stage,
                "Re-dispatching stalled workflow"
            );
            self.dispatch_stage(workflow, stage).await?;
            recovered += 1;
        }
        Ok(recovered)
    }
}

/// How to re-apply a result whose task was already settled: a previous
/// delivery updated the task but failed before the workflow was saved.
/// Workflow guards reject it if it was in fact applied.
fn reapplicable(task: &Task, result: &AgentResult) -> Option<ResultOutcome> {
    match task.status {
        TaskStatus::Completed if result.success => Some(ResultOutcome::Succeeded),
        TaskStatus::Failed if !result.success => Some(ResultOutcome::BusinessFailure {
            retryable: result.error.as_ref().is_some_and(|e| e.retryable) && task.can_retry(),
        }),
        _ => None,
    }
}

/// The one handler on the results stream.
struct ResultHandler {
    inner: Arc<Inner>,
}

#[async_trait]
impl MessageHandler for ResultHandler {
    async fn handle(&self, envelope: Envelope<Value>) -> std::result::Result<(), HandlerError> {
        self.inner
            .handle_result(envelope)
            .await
            .map_err(HandlerError::from)
    }
}
