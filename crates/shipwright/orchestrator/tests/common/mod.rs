//! Shared fixtures: a fast-polling service and scripted fake agents.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use shipwright_bus::{HandlerError, MessageBus, MessageHandler};
use shipwright_orchestrator::{OrchestrationService, OrchestratorConfig};
use shipwright_resilience::RetryPolicy;
use shipwright_types::{
    AgentError, AgentId, AgentResult, AgentType, Channel, Envelope, MessageType, StageOutput, Task,
    TaskId, WorkflowId,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

pub const SETTLE: Duration = Duration::from_secs(5);
pub const AGENT_GROUP: &str = "agents";

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

pub fn test_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.consumer.block_ms = 10;
    config.consumer.claim_idle_ms = 20;
    config.consumer.handler_timeout_ms = 2_000;
    config.consumer.max_delivery_attempts = 2;
    config.dispatch.default_timeout_ms = 60_000;
    config.dispatch.max_retries = 1;
    config.retry = RetryPolicy::immediate(2);
    config
}

pub async fn started(config: OrchestratorConfig) -> OrchestrationService {
    init_tracing();
    let service = OrchestrationService::in_memory(config);
    service.start().await.unwrap();
    service
}

/// Decides what an agent sends back for a task; `None` stays silent.
pub type Script = dyn Fn(&Task, usize) -> Option<AgentResult> + Send + Sync;

/// A fake agent serving every agent type's task stream.
pub struct FakeAgent {
    bus: Arc<MessageBus>,
    script: Arc<Script>,
    /// Publish every result twice with the same envelope id
    duplicate: bool,
    calls: AtomicUsize,
}

impl FakeAgent {
    pub async fn spawn(
        service: &OrchestrationService,
        script: impl Fn(&Task, usize) -> Option<AgentResult> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Self::spawn_with(service, script, false).await
    }

    pub async fn spawn_with(
        service: &OrchestrationService,
        script: impl Fn(&Task, usize) -> Option<AgentResult> + Send + Sync + 'static,
        duplicate: bool,
    ) -> Arc<Self> {
        let bus = service.bus();
        let agent = Arc::new(Self {
            bus: bus.clone(),
            script: Arc::new(script),
            duplicate,
            calls: AtomicUsize::new(0),
        });
        for agent_type in AgentType::ALL {
            bus.subscribe(&Channel::Tasks(agent_type).name(), AGENT_GROUP, agent.clone())
                .await
                .unwrap();
        }
        agent
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageHandler for FakeAgent {
    async fn handle(&self, envelope: Envelope<Value>) -> Result<(), HandlerError> {
        let task: Task = serde_json::from_value(envelope.payload)
            .map_err(|e| HandlerError::protocol(e.to_string()))?;
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let Some(result) = (self.script)(&task, call) else {
            return Ok(());
        };
        let reply = self
            .bus
            .codec()
            .wrap(
                MessageType::AgentResult,
                result,
                Some(envelope.correlation_id),
                envelope.tenant_id,
            )
            .map_err(|e| HandlerError::protocol(e.to_string()))?;
        let copies = if self.duplicate { 2 } else { 1 };
        for _ in 0..copies {
            self.bus
                .publish_durable(&Channel::Results.name(), &reply)
                .await
                .map_err(|e| HandlerError::transient(e.to_string()))?;
        }
        Ok(())
    }
}

pub fn success(task: &Task) -> AgentResult {
    AgentResult::succeeded(
        task.task_id,
        task.workflow_id,
        AgentId::new(format!("{}-1", task.agent_type)),
        task.agent_type,
        StageOutput::with_summary(format!("{} done", task.stage)),
    )
}

pub fn failure(task: &Task, code: &str, retryable: bool) -> AgentResult {
    AgentResult::failed(
        task.task_id,
        task.workflow_id,
        AgentId::new(format!("{}-1", task.agent_type)),
        task.agent_type,
        AgentError {
            code: code.to_string(),
            message: format!("{} failed", task.stage),
            retryable,
        },
    )
}

/// Publish `result` on the results stream as an agent would.
pub async fn reply(service: &OrchestrationService, workflow_id: WorkflowId, result: AgentResult) {
    let bus = service.bus();
    let envelope = bus
        .codec()
        .wrap(MessageType::AgentResult, result, Some(workflow_id.into()), None)
        .unwrap();
    bus.publish_durable(&Channel::Results.name(), &envelope)
        .await
        .unwrap();
}

/// The workflow's currently active task.
pub async fn active_task(service: &OrchestrationService, workflow_id: WorkflowId) -> Task {
    let task_id: TaskId = service
        .workflow_status(workflow_id)
        .await
        .unwrap()
        .active_task_id
        .expect("no active task");
    service
        .dispatcher()
        .task(&task_id)
        .await
        .unwrap()
        .expect("active task not stored")
}

/// Poll until `check` holds or `SETTLE` passes.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + SETTLE;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within {:?}", SETTLE);
}
