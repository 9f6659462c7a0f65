//! Schema error types

use semver::Version;
use shipwright_types::{ErrorClass, MessageType};
use thiserror::Error;

/// Errors raised while wrapping, encoding or validating envelopes.
///
/// All variants are protocol violations.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("malformed envelope: {0}")]
    Malformed(String),

    #[error("unknown message type '{0}'")]
    UnknownType(String),

    #[error("no schema registered for {0}")]
    Unregistered(MessageType),

    #[error("envelope is missing meta.schema_version")]
    MissingSchemaVersion,

    #[error("invalid schema version '{0}'")]
    InvalidVersion(String),

    #[error("{message_type} schema {found} is outside the compatibility window of {current} (N-{window})")]
    IncompatibleVersion {
        message_type: MessageType,
        found: Version,
        current: Version,
        window: u64,
    },

    #[error("expected {expected} envelope, got {found}")]
    UnexpectedType {
        expected: MessageType,
        found: MessageType,
    },

    #[error("invalid {message_type} payload: {}", .problems.join("; "))]
    InvalidPayload {
        message_type: MessageType,
        problems: Vec<String>,
    },

    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl SchemaError {
    pub fn class(&self) -> ErrorClass {
        ErrorClass::Protocol
    }
}

/// Result type for schema operations
pub type Result<T> = std::result::Result<T, SchemaError>;
