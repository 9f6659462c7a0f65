//! Envelope codec.
//!
//! Validation on ingress runs in a fixed order so the error names the first
//! layer that failed: JSON, message type, schema version presence, version
//! window, envelope shape, then the payload's own semantic rules.

use crate::error::{Result, SchemaError};
use crate::registry::SchemaRegistry;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use shipwright_types::{CorrelationId, Envelope, MessageType};
use std::sync::Arc;

/// Wraps, encodes and validates envelopes against a [`SchemaRegistry`].
#[derive(Clone, Debug)]
pub struct EnvelopeCodec {
    registry: Arc<SchemaRegistry>,
    source: String,
}

impl EnvelopeCodec {
    /// `source` is stamped on every envelope this codec wraps.
    pub fn new(registry: Arc<SchemaRegistry>, source: impl Into<String>) -> Self {
        Self {
            registry,
            source: source.into(),
        }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Wrap a payload in a fresh envelope at the type's current schema
    /// version. A missing correlation id gets a new one.
    pub fn wrap<T>(
        &self,
        message_type: MessageType,
        payload: T,
        correlation_id: Option<CorrelationId>,
        tenant_id: Option<String>,
    ) -> Result<Envelope<T>> {
        let version = self.registry.current_version(message_type)?.clone();
        let correlation_id = correlation_id.unwrap_or_else(CorrelationId::generate);
        Ok(
            Envelope::new(message_type, payload, correlation_id, self.source.clone(), version)
                .with_tenant(tenant_id),
        )
    }

    /// Serialize an envelope. The payload is validated first so nothing
    /// invalid ever reaches the wire.
    pub fn encode<T: Serialize>(&self, envelope: &Envelope<T>) -> Result<String> {
        let payload = serde_json::to_value(&envelope.payload)
            .map_err(|e| SchemaError::Serialization(e.to_string()))?;
        self.registry
            .validate_payload(envelope.message_type, &payload)?;
        serde_json::to_string(envelope).map_err(|e| SchemaError::Serialization(e.to_string()))
    }

    /// Validate raw JSON into an envelope with an untyped payload.
    pub fn validate(&self, raw: &str) -> Result<Envelope<Value>> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| SchemaError::Malformed(e.to_string()))?;
        let obj = value
            .as_object()
            .ok_or_else(|| SchemaError::Malformed("envelope must be a JSON object".into()))?;

        let type_name = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| SchemaError::Malformed("missing 'type'".into()))?;
        let message_type = MessageType::parse(type_name)
            .ok_or_else(|| SchemaError::UnknownType(type_name.to_string()))?;

        let version_str = obj
            .get("meta")
            .and_then(|m| m.get("schema_version"))
            .ok_or(SchemaError::MissingSchemaVersion)?
            .as_str()
            .ok_or_else(|| SchemaError::InvalidVersion("schema_version must be a string".into()))?;
        let version = semver::Version::parse(version_str)
            .map_err(|_| SchemaError::InvalidVersion(version_str.to_string()))?;
        self.registry.check_version(message_type, &version)?;

        let envelope: Envelope<Value> =
            serde_json::from_value(value).map_err(|e| SchemaError::Malformed(e.to_string()))?;
        self.registry
            .validate_payload(message_type, &envelope.payload)?;
        Ok(envelope)
    }

    /// Validate and decode into a typed envelope.
    pub fn decode<T: DeserializeOwned>(&self, raw: &str) -> Result<Envelope<T>> {
        let envelope = self.validate(raw)?;
        let message_type = envelope.message_type;
        let payload = T::deserialize(&envelope.payload).map_err(|e| SchemaError::InvalidPayload {
            message_type,
            problems: vec![e.to_string()],
        })?;
        Ok(envelope.map_payload(|_| payload))
    }

    /// Like [`decode`](Self::decode) but also requires a specific type.
    pub fn decode_as<T: DeserializeOwned>(
        &self,
        expected: MessageType,
        raw: &str,
    ) -> Result<Envelope<T>> {
        let envelope = self.validate(raw)?;
        if envelope.message_type != expected {
            return Err(SchemaError::UnexpectedType {
                expected,
                found: envelope.message_type,
            });
        }
        let payload = T::deserialize(&envelope.payload).map_err(|e| SchemaError::InvalidPayload {
            message_type: expected,
            problems: vec![e.to_string()],
        })?;
        Ok(envelope.map_payload(|_| payload))
    }

    /// Next attempt of an envelope: same id, attempts + 1, last_error set.
    pub fn retry<T>(&self, envelope: Envelope<T>, error: impl Into<String>) -> Envelope<T> {
        envelope.retried(error)
    }
}
