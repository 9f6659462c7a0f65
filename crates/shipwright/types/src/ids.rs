//! Strongly-typed identifiers
//!
//! UUID-backed ids are wrapped in newtypes so a task id can never be passed
//! where a workflow id is expected. They serialize as bare UUID strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Error returned when parsing an identifier from a string.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid {kind} id '{value}'")]
pub struct IdParseError {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident, $kind:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self).map_err(|_| IdParseError {
                    kind: $kind,
                    value: s.to_string(),
                })
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a workflow
    WorkflowId,
    "workflow"
);

uuid_id!(
    /// Unique identifier for a dispatched task
    TaskId,
    "task"
);

uuid_id!(
    /// Dedup key of a logical message; stable across redeliveries and retries
    EnvelopeId,
    "envelope"
);

uuid_id!(
    /// Identifier of a pending approval decision
    DecisionId,
    "decision"
);

uuid_id!(
    /// Identifier of a pending clarification request
    ClarificationId,
    "clarification"
);

/// Identifier of an agent process (free-form, assigned by the agent itself)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
