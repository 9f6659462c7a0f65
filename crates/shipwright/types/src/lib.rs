//! Shared data model for Shipwright
//!
//! Every crate in the workspace speaks in terms of the types defined here:
//!
//! - [`Envelope`]: the canonical wire wrapper around every bus payload
//! - [`Task`]: a unit of work dispatched to an agent type
//! - [`AgentResult`]: the completion signal an agent sends back
//! - [`Workflow`]: the per-submission stage/status record
//! - [`Channel`]: the single canonical source of stream and topic names
//!
//! Stage sequences ([`WorkflowType::stages`]) and the error classification
//! ([`ErrorClass`]) also live here so producers and consumers never drift.

#![deny(unsafe_code)]

pub mod channel;
pub mod dead_letter;
pub mod envelope;
pub mod error;
pub mod ids;
pub mod result;
pub mod stage;
pub mod task;
pub mod workflow;

pub use channel::{dead_letter_stream, Channel, NAMESPACE};
pub use dead_letter::DeadLetterRecord;
pub use envelope::{CorrelationId, Envelope, EnvelopeMeta, MessageType};
pub use error::ErrorClass;
pub use ids::{AgentId, ClarificationId, DecisionId, EnvelopeId, IdParseError, TaskId, WorkflowId};
pub use result::{AgentError, AgentResult, ClarificationRequest, ResultMetrics, ResultStatus};
pub use stage::{AgentType, Stage, WorkflowType};
pub use task::{ArtifactRef, StageOutput, Task, TaskAction, TaskPayload, TaskPriority, TaskStatus};
pub use workflow::{
    ClarificationAnswer, DecisionCategory, FailureInfo, PendingClarification, PendingDecision,
    TransitionRecord, Workflow, WorkflowEvent, WorkflowEventKind, WorkflowStatus,
};
