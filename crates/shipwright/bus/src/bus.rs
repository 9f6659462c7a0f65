//! Message bus facade.

use crate::consumer::{ConsumerConfig, StreamConsumer};
use crate::error::{BusError, Result};
use crate::memory::InMemoryBus;
use crate::registry::SubscriptionRegistry;
use crate::traits::{DurableStream, MessageHandler, PubSub};
use serde::Serialize;
use shipwright_kv::IdempotencyGuard;
use shipwright_schema::EnvelopeCodec;
use shipwright_types::Envelope;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::info;

/// Encodes envelopes onto topics and streams and owns the consumer loops.
pub struct MessageBus {
    pubsub: Arc<dyn PubSub>,
    streams: Arc<dyn DurableStream>,
    codec: EnvelopeCodec,
    guard: IdempotencyGuard,
    consumer_config: ConsumerConfig,
    subscriptions: SubscriptionRegistry,
    shutdown: watch::Sender<bool>,
    consumers: Mutex<Vec<JoinHandle<()>>>,
}

impl MessageBus {
    pub fn new(
        pubsub: Arc<dyn PubSub>,
        streams: Arc<dyn DurableStream>,
        codec: EnvelopeCodec,
        guard: IdempotencyGuard,
        consumer_config: ConsumerConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            pubsub,
            streams,
            codec,
            guard,
            consumer_config,
            subscriptions: SubscriptionRegistry::new(),
            shutdown,
            consumers: Mutex::new(Vec::new()),
        }
    }

    /// Bus backed by a single [`InMemoryBus`] for both topics and streams.
    pub fn in_memory(
        codec: EnvelopeCodec,
        guard: IdempotencyGuard,
        consumer_config: ConsumerConfig,
    ) -> Self {
        let bus = Arc::new(InMemoryBus::new());
        Self::new(bus.clone(), bus, codec, guard, consumer_config)
    }

    pub fn codec(&self) -> &EnvelopeCodec {
        &self.codec
    }

    pub fn streams(&self) -> Arc<dyn DurableStream> {
        self.streams.clone()
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    /// Validate, encode and broadcast. Returns the receiver count.
    pub async fn publish<T: Serialize>(&self, topic: &str, envelope: &Envelope<T>) -> Result<usize> {
        let raw = self.codec.encode(envelope)?;
        self.pubsub.publish(topic, raw).await
    }

    /// Validate, encode and append to a durable stream. Returns the entry id.
    pub async fn publish_durable<T: Serialize>(
        &self,
        stream: &str,
        envelope: &Envelope<T>,
    ) -> Result<String> {
        let raw = self.codec.encode(envelope)?;
        self.streams.append(stream, raw).await
    }

    /// Raw JSON receiver for a pub/sub topic.
    pub fn subscribe_topic(&self, topic: &str) -> broadcast::Receiver<String> {
        self.pubsub.subscribe(topic)
    }

    /// Register `handler` as the only consumer of `(stream, group)` and spawn
    /// its loop.
    pub async fn subscribe(
        &self,
        stream: &str,
        group: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<()> {
        if *self.shutdown.borrow() {
            return Err(BusError::Closed);
        }
        self.subscriptions.register(stream, group)?;
        self.streams.ensure_group(stream, group).await?;

        let consumer = StreamConsumer::new(
            stream,
            group,
            self.streams.clone(),
            self.codec.clone(),
            self.guard.clone(),
            handler,
            self.consumer_config.clone(),
        );
        let handle = tokio::spawn(consumer.run(self.shutdown.subscribe()));
        self.consumers.lock().await.push(handle);

        info!(stream = %stream, group = %group, "Subscribed");
        Ok(())
    }

    /// Stop every consumer loop after its current batch.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let handles: Vec<_> = self.consumers.lock().await.drain(..).collect();
        let count = handles.len();
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Consumer task panicked");
            }
        }
        info!(consumers = count, "Message bus shut down");
    }
}
