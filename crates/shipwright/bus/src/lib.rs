//! Message bus adapter
//!
//! Two delivery modes share one facade:
//!
//! - **pub/sub** ([`PubSub`]): at-most-once, unpersisted; used for workflow
//!   status events nobody must act on
//! - **durable streams** ([`DurableStream`]): at-least-once with consumer
//!   groups, pending-entry lists and redelivery; used for task dispatch and
//!   agent results
//!
//! [`StreamConsumer`] turns at-least-once delivery into exactly-once effect
//! with envelope-id idempotency markers, and routes entries that exhaust
//! their delivery attempts to `<stream>:dead-letter`.

#![deny(unsafe_code)]

pub mod bus;
pub mod consumer;
pub mod error;
pub mod memory;
pub mod registry;
pub mod traits;

pub use bus::MessageBus;
pub use consumer::{BatchStats, ConsumerConfig, StreamConsumer};
pub use error::{BusError, HandlerError, Result};
pub use memory::{InMemoryBus, DEFAULT_STREAM_MAX_LEN, DEFAULT_TOPIC_CAPACITY};
pub use registry::SubscriptionRegistry;
pub use traits::{DurableStream, MessageHandler, PubSub, StreamEntry};
