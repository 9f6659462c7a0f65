//! Workflow state machine
//!
//! - [`WorkflowStateMachine`] applies stage results and operator actions to a
//!   [`Workflow`](shipwright_types::Workflow), enforcing guards and returning
//!   the [`Effect`]s to carry out
//! - [`GatePolicy`] decides when a stage pauses for approval or clarification
//! - [`WorkflowStore`] persists workflows with an optimistic version check
//!
//! Stage order comes from
//! [`WorkflowType::stages`](shipwright_types::WorkflowType::stages).

#![deny(unsafe_code)]

pub mod error;
pub mod machine;
pub mod policy;
pub mod store;

pub use error::{GuardRejection, Result, WorkflowError};
pub use machine::{Effect, Transition, WorkflowStateMachine};
pub use policy::GatePolicy;
pub use store::{InMemoryWorkflowStore, WorkflowStore};
