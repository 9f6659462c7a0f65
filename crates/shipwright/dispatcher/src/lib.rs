//! Agent dispatcher
//!
//! Maps workflow stages to agent types, builds typed tasks, publishes them on
//! per-agent durable streams and classifies the results agents send back.
//!
//! - [`routing`] holds the one stage → agent table
//! - [`AgentDispatcher`] owns the task lifecycle: dispatch, result
//!   classification, timeout sweeps and re-dispatch
//! - [`TaskStore`] persists tasks by id

#![deny(unsafe_code)]

pub mod dispatcher;
pub mod error;
pub mod routing;
pub mod store;

pub use dispatcher::{AgentDispatcher, ClassifiedResult, DispatchConfig, ResultOutcome, SweepReport};
pub use error::{DispatchError, Result};
pub use routing::{agent_for_stage, STAGE_AGENT_TABLE};
pub use store::{InMemoryTaskStore, TaskStore};
