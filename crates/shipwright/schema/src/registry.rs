//! Schema registry: message type → version + compatibility window + validator.
//!
//! During a rolling deploy producers and consumers run different builds. A
//! consumer accepts any payload whose schema shares the current major version
//! and whose minor version is at most `window` behind the current one. Newer
//! minors and other majors are rejected.

use crate::error::{Result, SchemaError};
use crate::validate::Validate;
use semver::Version;
use serde::de::DeserializeOwned;
use serde_json::Value;
use shipwright_types::{AgentResult, DeadLetterRecord, MessageType, Task, WorkflowEvent};
use std::collections::HashMap;

/// Default compatibility window (N-2).
pub const DEFAULT_COMPATIBILITY_WINDOW: u64 = 2;

type PayloadValidator = fn(&Value) -> std::result::Result<(), Vec<String>>;

/// Schema of one message type.
#[derive(Clone, Debug)]
pub struct SchemaEntry {
    pub message_type: MessageType,
    pub current: Version,
    pub window: u64,
    validator: PayloadValidator,
}

/// Whether `candidate` may be consumed by a reader at `current`.
pub fn is_compatible(current: &Version, candidate: &Version, window: u64) -> bool {
    candidate.major == current.major
        && candidate.minor <= current.minor
        && current.minor - candidate.minor <= window
}

fn validate_as<T: DeserializeOwned + Validate>(value: &Value) -> std::result::Result<(), Vec<String>> {
    let decoded = T::deserialize(value).map_err(|e| vec![e.to_string()])?;
    decoded.validate()
}

/// Registry of all message schemas known to this process.
#[derive(Clone, Debug, Default)]
pub struct SchemaRegistry {
    entries: HashMap<MessageType, SchemaEntry>,
}

impl SchemaRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in message type at 1.0.0.
    pub fn with_defaults(window: u64) -> Self {
        let v1 = Version::new(1, 0, 0);
        let mut registry = Self::new();
        registry.register::<Task>(MessageType::TaskDispatch, v1.clone(), window);
        registry.register::<AgentResult>(MessageType::AgentResult, v1.clone(), window);
        registry.register::<WorkflowEvent>(MessageType::WorkflowEvent, v1.clone(), window);
        registry.register::<DeadLetterRecord>(MessageType::DeadLetter, v1, window);
        registry
    }

    /// Register (or replace) the schema for `message_type` with payload type `T`.
    pub fn register<T: DeserializeOwned + Validate>(
        &mut self,
        message_type: MessageType,
        current: Version,
        window: u64,
    ) {
        self.entries.insert(
            message_type,
            SchemaEntry {
                message_type,
                current,
                window,
                validator: validate_as::<T>,
            },
        );
    }

    pub fn entry(&self, message_type: MessageType) -> Result<&SchemaEntry> {
        self.entries
            .get(&message_type)
            .ok_or(SchemaError::Unregistered(message_type))
    }

    pub fn current_version(&self, message_type: MessageType) -> Result<&Version> {
        Ok(&self.entry(message_type)?.current)
    }

    /// Reject versions outside the compatibility window.
    pub fn check_version(&self, message_type: MessageType, found: &Version) -> Result<()> {
        let entry = self.entry(message_type)?;
        if is_compatible(&entry.current, found, entry.window) {
            Ok(())
        } else {
            Err(SchemaError::IncompatibleVersion {
                message_type,
                found: found.clone(),
                current: entry.current.clone(),
                window: entry.window,
            })
        }
    }

    /// Run the payload validator registered for `message_type`.
    pub fn validate_payload(&self, message_type: MessageType, payload: &Value) -> Result<()> {
        let entry = self.entry(message_type)?;
        (entry.validator)(payload).map_err(|problems| SchemaError::InvalidPayload {
            message_type,
            problems,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
