//! Transport traits.
//!
//! Payloads are already-encoded envelope JSON; encoding and validation live
//! in [`MessageBus`](crate::MessageBus) and [`StreamConsumer`](crate::StreamConsumer).

use crate::error::{HandlerError, Result};
use async_trait::async_trait;
use serde_json::Value;
use shipwright_types::Envelope;
use std::time::Duration;
use tokio::sync::broadcast;

/// Fire-and-forget topics. At-most-once, nothing is persisted; a subscriber
/// that is not listening misses the message.
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Returns the number of subscribers that received the message.
    async fn publish(&self, topic: &str, message: String) -> Result<usize>;

    fn subscribe(&self, topic: &str) -> broadcast::Receiver<String>;
}

/// One entry as seen by a consumer group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: String,
    pub payload: String,
    /// Deliveries to this group so far, including the current one.
    /// Zero for entries read through [`DurableStream::range`].
    pub delivery_count: u32,
    /// Error recorded by the previous failed delivery.
    pub last_error: Option<String>,
}

/// Persistent append-only streams with consumer groups.
///
/// An entry read by a group stays pending until acknowledged. Pending
/// entries idle past a threshold, or marked failed, can be claimed again by
/// any consumer of the group, incrementing `delivery_count`.
#[async_trait]
pub trait DurableStream: Send + Sync {
    /// Append; returns the entry id.
    async fn append(&self, stream: &str, payload: String) -> Result<String>;

    /// Create the group (and the stream) if missing. New groups start from
    /// the beginning of the stream.
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<()>;

    /// Up to `count` never-delivered entries, waiting at most `block` for one.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>>;

    /// Take over pending entries idle for at least `min_idle` or marked failed.
    async fn claim_idle(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>>;

    /// Returns how many of `ids` were pending.
    async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> Result<usize>;

    /// Keep the entry pending, store `error`, make it claimable at once.
    async fn record_failure(&self, stream: &str, group: &str, id: &str, error: &str)
        -> Result<()>;

    async fn pending_count(&self, stream: &str, group: &str) -> Result<usize>;

    async fn len(&self, stream: &str) -> Result<usize>;

    /// Every entry in the stream, oldest first.
    async fn range(&self, stream: &str) -> Result<Vec<StreamEntry>>;
}

/// Consumer-side handler for one `(stream, group)`.
///
/// Receives envelopes that already passed schema validation and the
/// idempotency check. Returning `Ok` acknowledges the entry.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, envelope: Envelope<Value>) -> std::result::Result<(), HandlerError>;
}
