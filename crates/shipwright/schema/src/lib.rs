//! Envelope codec and schema registry
//!
//! Every message on the bus is validated here on the way in and on the way
//! out:
//!
//! - [`SchemaRegistry`] maps each [`MessageType`](shipwright_types::MessageType)
//!   to its current semver version, a compatibility window, and a payload
//!   validator
//! - [`EnvelopeCodec`] wraps payloads into envelopes, encodes them to JSON,
//!   validates raw JSON back into envelopes, and produces retry envelopes
//!
//! A validation failure is always a protocol error: it is never coerced and
//! never retried into success.

#![deny(unsafe_code)]

pub mod codec;
pub mod error;
pub mod registry;
pub mod validate;

pub use codec::EnvelopeCodec;
pub use error::{Result, SchemaError};
pub use registry::{is_compatible, SchemaEntry, SchemaRegistry, DEFAULT_COMPATIBILITY_WINDOW};
pub use validate::Validate;
