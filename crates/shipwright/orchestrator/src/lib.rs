//! Orchestration service
//!
//! The single writer of workflow state. [`OrchestrationService`] holds one
//! subscription on the results stream, applies each agent result to its
//! workflow through the state machine, dispatches the next stage, and
//! exposes the operator operations (submit, approve, reject, clarify,
//! pause, resume, cancel, status).
//!
//! Configuration is layered with the `config` crate: defaults, an optional
//! file, then `SHIPWRIGHT_*` environment variables.

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod service;
pub mod status;

pub use config::{
    IdempotencyConfig, LoggingConfig, OrchestratorConfig, SchemaConfig, ServiceConfig, ENV_PREFIX,
};
pub use error::{OrchestratorError, Result};
pub use service::{OrchestrationService, SweepSummary};
pub use status::{SettleOutcome, StatusView, EXIT_STILL_RUNNING};
