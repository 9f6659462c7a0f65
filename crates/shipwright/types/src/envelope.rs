//! The canonical message envelope.
//!
//! Every message that crosses the bus (task dispatch, agent result, workflow
//! event, dead letter) is an `Envelope<T>` serialized as JSON. The envelope
//! carries identity (`id`, the dedup key), grouping (`correlation_id`),
//! timing, and retry metadata around the payload.

use crate::ids::{EnvelopeId, WorkflowId};
use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Registered message types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    #[serde(rename = "task.dispatch")]
    TaskDispatch,
    #[serde(rename = "agent.result")]
    AgentResult,
    #[serde(rename = "workflow.event")]
    WorkflowEvent,
    #[serde(rename = "dead_letter")]
    DeadLetter,
}

impl MessageType {
    pub const ALL: [MessageType; 4] = [
        MessageType::TaskDispatch,
        MessageType::AgentResult,
        MessageType::WorkflowEvent,
        MessageType::DeadLetter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::TaskDispatch => "task.dispatch",
            MessageType::AgentResult => "agent.result",
            MessageType::WorkflowEvent => "workflow.event",
            MessageType::DeadLetter => "dead_letter",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Groups every message belonging to one workflow. Doubles as the trace id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<WorkflowId> for CorrelationId {
    fn from(id: WorkflowId) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Retry and schema metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeMeta {
    /// Delivery attempts already made for this logical message
    #[serde(default)]
    pub attempts: u32,
    /// Error observed on the previous attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Schema version of the payload; mandatory on the wire
    pub schema_version: Version,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub custom: HashMap<String, serde_json::Value>,
}

impl EnvelopeMeta {
    pub fn new(schema_version: Version) -> Self {
        Self {
            attempts: 0,
            last_error: None,
            schema_version,
            custom: HashMap::new(),
        }
    }
}

/// Wire wrapper around a payload of type `T`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub id: EnvelopeId,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: CorrelationId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    pub source: String,
    pub payload: T,
    pub meta: EnvelopeMeta,
}

impl<T> Envelope<T> {
    /// Build a fresh envelope: new id, current time, zero attempts.
    pub fn new(
        message_type: MessageType,
        payload: T,
        correlation_id: CorrelationId,
        source: impl Into<String>,
        schema_version: Version,
    ) -> Self {
        Self {
            id: EnvelopeId::generate(),
            message_type,
            timestamp: Utc::now(),
            correlation_id,
            tenant_id: None,
            source: source.into(),
            payload,
            meta: EnvelopeMeta::new(schema_version),
        }
    }

    pub fn with_tenant(mut self, tenant_id: Option<String>) -> Self {
        self.tenant_id = tenant_id;
        self
    }

    /// Next attempt of the same logical message: same id, `attempts + 1`,
    /// `last_error` set.
    pub fn retried(mut self, error: impl Into<String>) -> Self {
        self.meta.attempts = self.meta.attempts.saturating_add(1);
        self.meta.last_error = Some(error.into());
        self
    }

    /// Replace the payload, keeping identity and metadata.
    pub fn map_payload<U>(self, f: impl FnOnce(T) -> U) -> Envelope<U> {
        Envelope {
            id: self.id,
            message_type: self.message_type,
            timestamp: self.timestamp,
            correlation_id: self.correlation_id,
            tenant_id: self.tenant_id,
            source: self.source,
            payload: f(self.payload),
            meta: self.meta,
        }
    }

    pub fn trace_id(&self) -> &str {
        self.correlation_id.as_str()
    }
}
