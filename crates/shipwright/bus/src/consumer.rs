//! The stream consumer loop.
//!
//! One loop per `(stream, group)`. Each pass reclaims idle or failed pending
//! entries, then reads new ones, then handles the batch in order. Shutdown
//! is checked between passes; a batch in progress always finishes.

use crate::error::{HandlerError, Result};
use crate::traits::{DurableStream, MessageHandler, StreamEntry};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shipwright_kv::{Claim, IdempotencyGuard};
use shipwright_schema::EnvelopeCodec;
use shipwright_types::{dead_letter_stream, CorrelationId, DeadLetterRecord, MessageType};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

const RAW_EXCERPT_LEN: usize = 512;

/// Consumer loop settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub consumer_name: String,
    pub batch_size: usize,
    /// How long a read waits for new entries
    pub block_ms: u64,
    /// Pending entries idle this long are reclaimed
    pub claim_idle_ms: u64,
    pub handler_timeout_ms: u64,
    /// Retries allowed; an entry whose attempts exceed this is dead-lettered
    pub max_delivery_attempts: u32,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            consumer_name: "shipwright-1".to_string(),
            batch_size: 16,
            block_ms: 1_000,
            claim_idle_ms: 60_000,
            handler_timeout_ms: 30_000,
            max_delivery_attempts: 5,
        }
    }
}

/// Counters for one pass of the loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub processed: usize,
    pub duplicates: usize,
    pub deferred: usize,
    pub failed: usize,
    pub rejected: usize,
    pub dead_lettered: usize,
}

impl BatchStats {
    pub fn total(&self) -> usize {
        self.processed
            + self.duplicates
            + self.deferred
            + self.failed
            + self.rejected
            + self.dead_lettered
    }
}

/// Fields read from a raw entry without full validation.
struct Peek {
    attempts: u32,
    correlation_id: Option<CorrelationId>,
    tenant_id: Option<String>,
}

fn peek(raw: &str) -> Peek {
    let value: Value = serde_json::from_str(raw).unwrap_or(Value::Null);
    Peek {
        attempts: value
            .pointer("/meta/attempts")
            .and_then(Value::as_u64)
            .map(|a| a.min(u32::MAX as u64) as u32)
            .unwrap_or(0),
        correlation_id: value
            .get("correlation_id")
            .and_then(Value::as_str)
            .map(CorrelationId::new),
        tenant_id: value
            .get("tenant_id")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

fn excerpt(raw: &str) -> &str {
    match raw.char_indices().nth(RAW_EXCERPT_LEN) {
        Some((idx, _)) => &raw[..idx],
        None => raw,
    }
}

pub struct StreamConsumer {
    stream: String,
    group: String,
    streams: Arc<dyn DurableStream>,
    codec: EnvelopeCodec,
    guard: IdempotencyGuard,
    handler: Arc<dyn MessageHandler>,
    config: ConsumerConfig,
}

impl StreamConsumer {
    pub fn new(
        stream: impl Into<String>,
        group: impl Into<String>,
        streams: Arc<dyn DurableStream>,
        codec: EnvelopeCodec,
        guard: IdempotencyGuard,
        handler: Arc<dyn MessageHandler>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            stream: stream.into(),
            group: group.into(),
            streams,
            codec,
            guard,
            handler,
            config,
        }
    }

    /// Run until `shutdown` flips to true or its sender is dropped.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        info!(
            stream = %self.stream,
            group = %self.group,
            consumer = %self.config.consumer_name,
            "Stream consumer started"
        );

        loop {
            if *shutdown.borrow() || shutdown.has_changed().is_err() {
                break;
            }
            match self.poll_once().await {
                Ok(stats) if stats.total() > 0 => {
                    debug!(stream = %self.stream, ?stats, "Batch handled");
                }
                Ok(_) => tokio::task::yield_now().await,
                Err(e) => {
                    error!(stream = %self.stream, group = %self.group, error = %e, "Consumer pass failed");
                    tokio::time::sleep(Duration::from_millis(self.config.block_ms.max(1))).await;
                }
            }
        }

        info!(stream = %self.stream, group = %self.group, "Stream consumer stopped");
    }

    /// One pass: reclaim, read, handle.
    pub async fn poll_once(&self) -> Result<BatchStats> {
        let batch = self.config.batch_size.max(1);
        let consumer = self.config.consumer_name.as_str();

        let mut entries = self
            .streams
            .claim_idle(
                &self.stream,
                &self.group,
                consumer,
                Duration::from_millis(self.config.claim_idle_ms),
                batch,
            )
            .await?;

        if entries.len() < batch {
            let block = if entries.is_empty() {
                Duration::from_millis(self.config.block_ms)
            } else {
                Duration::ZERO
            };
            let fresh = self
                .streams
                .read_group(&self.stream, &self.group, consumer, batch - entries.len(), block)
                .await?;
            entries.extend(fresh);
        }

        let mut stats = BatchStats::default();
        for entry in entries {
            self.process(entry, &mut stats).await?;
        }
        Ok(stats)
    }

    async fn process(&self, entry: StreamEntry, stats: &mut BatchStats) -> Result<()> {
        let peeked = peek(&entry.payload);
        let attempts = peeked
            .attempts
            .max(entry.delivery_count.saturating_sub(1));

        if attempts > self.config.max_delivery_attempts {
            self.dead_letter(&entry, attempts, peeked).await?;
            stats.dead_lettered += 1;
            return Ok(());
        }

        let envelope = match self.codec.validate(&entry.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(
                    stream = %self.stream,
                    group = %self.group,
                    entry_id = %entry.id,
                    attempts,
                    reason = %e,
                    raw = %excerpt(&entry.payload),
                    "Rejected invalid envelope"
                );
                self.streams
                    .record_failure(&self.stream, &self.group, &entry.id, &e.to_string())
                    .await?;
                stats.rejected += 1;
                return Ok(());
            }
        };

        let envelope_id = envelope.id;
        let trace_id = envelope.correlation_id.clone();

        match self.guard.claim(&envelope_id).await {
            Ok(Claim::Acquired) => {}
            Ok(Claim::AlreadySeen) => {
                debug!(entry_id = %entry.id, envelope_id = %envelope_id, "Skipping duplicate");
                self.ack(&entry.id).await?;
                stats.duplicates += 1;
                return Ok(());
            }
            Ok(Claim::InFlight) => {
                debug!(entry_id = %entry.id, envelope_id = %envelope_id, "Envelope in flight elsewhere");
                stats.deferred += 1;
                return Ok(());
            }
            Err(e) => {
                warn!(entry_id = %entry.id, envelope_id = %envelope_id, error = %e, "Idempotency check failed");
                self.streams
                    .record_failure(&self.stream, &self.group, &entry.id, &e.to_string())
                    .await?;
                stats.failed += 1;
                return Ok(());
            }
        }

        let timeout = Duration::from_millis(self.config.handler_timeout_ms);
        let outcome = match tokio::time::timeout(timeout, self.handler.handle(envelope)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(HandlerError::transient(format!(
                "handler timed out after {}ms",
                self.config.handler_timeout_ms
            ))),
        };

        match outcome {
            Ok(()) => {
                // The effect is applied; a replay after a lost marker is
                // absorbed by the handler's own guards.
                if let Err(e) = self.guard.complete(&envelope_id).await {
                    warn!(
                        entry_id = %entry.id,
                        envelope_id = %envelope_id,
                        error = %e,
                        "Failed to record done marker, acking anyway"
                    );
                }
                self.ack(&entry.id).await?;
                stats.processed += 1;
            }
            Err(err) => {
                warn!(
                    stream = %self.stream,
                    entry_id = %entry.id,
                    envelope_id = %envelope_id,
                    trace_id = %trace_id,
                    attempts,
                    class = %err.class,
                    error = %err.message,
                    "Handler failed, entry left for redelivery"
                );
                if let Err(e) = self.guard.release(&envelope_id).await {
                    warn!(envelope_id = %envelope_id, error = %e, "Failed to release idempotency claim");
                }
                self.streams
                    .record_failure(&self.stream, &self.group, &entry.id, &err.to_string())
                    .await?;
                stats.failed += 1;
            }
        }
        Ok(())
    }

    async fn dead_letter(&self, entry: &StreamEntry, attempts: u32, peeked: Peek) -> Result<()> {
        let reason = entry.last_error.clone().unwrap_or_else(|| {
            format!(
                "exceeded {} delivery attempts",
                self.config.max_delivery_attempts
            )
        });
        let record = DeadLetterRecord::new(
            self.stream.as_str(),
            self.group.as_str(),
            entry.id.as_str(),
            attempts,
            reason.as_str(),
            &entry.payload,
        );
        let envelope = self.codec.wrap(
            MessageType::DeadLetter,
            record,
            peeked.correlation_id,
            peeked.tenant_id,
        )?;
        let raw = self.codec.encode(&envelope)?;
        let dead_letter = dead_letter_stream(&self.stream);
        self.streams.append(&dead_letter, raw).await?;
        self.ack(&entry.id).await?;

        warn!(
            stream = %self.stream,
            group = %self.group,
            entry_id = %entry.id,
            attempts,
            reason = %reason,
            dead_letter_stream = %dead_letter,
            "Entry dead-lettered"
        );
        Ok(())
    }

    async fn ack(&self, entry_id: &str) -> Result<()> {
        self.streams
            .ack(&self.stream, &self.group, &[entry_id.to_string()])
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBus;
    use async_trait::async_trait;
    use shipwright_kv::{InMemoryKvStore, KeyValueStore, KvError, DEFAULT_MARKER_TTL};
    use shipwright_schema::{SchemaRegistry, DEFAULT_COMPATIBILITY_WINDOW};
    use shipwright_types::{
        Envelope, ErrorClass, Workflow, WorkflowEvent, WorkflowEventKind, WorkflowType,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    const STREAM: &str = "shipwright:results";
    const GROUP: &str = "orchestrator";

    struct Counting {
        calls: AtomicUsize,
        fail_first: usize,
    }

    #[async_trait]
    impl MessageHandler for Counting {
        async fn handle(&self, _envelope: Envelope<Value>) -> std::result::Result<(), HandlerError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(HandlerError::new(ErrorClass::Transient, "db down"))
            } else {
                Ok(())
            }
        }
    }

    /// Claims work, but every plain write fails.
    struct NoDoneMarkers(InMemoryKvStore);

    #[async_trait]
    impl KeyValueStore for NoDoneMarkers {
        async fn get(&self, key: &str) -> shipwright_kv::Result<Option<String>> {
            self.0.get(key).await
        }

        async fn set(
            &self,
            _key: &str,
            _value: String,
            _ttl: Option<Duration>,
        ) -> shipwright_kv::Result<()> {
            Err(KvError::Unavailable("kv write refused".into()))
        }

        async fn set_if_not_exists(
            &self,
            key: &str,
            value: String,
            ttl: Option<Duration>,
        ) -> shipwright_kv::Result<bool> {
            self.0.set_if_not_exists(key, value, ttl).await
        }

        async fn incr(&self, key: &str, delta: i64) -> shipwright_kv::Result<i64> {
            self.0.incr(key, delta).await
        }

        async fn compare_and_swap(
            &self,
            key: &str,
            expected: Option<&str>,
            new: String,
            ttl: Option<Duration>,
        ) -> shipwright_kv::Result<bool> {
            self.0.compare_and_swap(key, expected, new, ttl).await
        }

        async fn delete(&self, key: &str) -> shipwright_kv::Result<bool> {
            self.0.delete(key).await
        }

        async fn ttl(&self, key: &str) -> shipwright_kv::Result<Option<Duration>> {
            self.0.ttl(key).await
        }
    }

    struct Fixture {
        bus: Arc<InMemoryBus>,
        codec: EnvelopeCodec,
        handler: Arc<Counting>,
        consumer: StreamConsumer,
    }

    async fn fixture(fail_first: usize) -> Fixture {
        fixture_with(fail_first, 3).await
    }

    async fn fixture_with(fail_first: usize, max_delivery_attempts: u32) -> Fixture {
        fixture_over(fail_first, max_delivery_attempts, Arc::new(InMemoryKvStore::new())).await
    }

    async fn fixture_over(
        fail_first: usize,
        max_delivery_attempts: u32,
        kv: Arc<dyn KeyValueStore>,
    ) -> Fixture {
        let bus = Arc::new(InMemoryBus::new());
        bus.ensure_group(STREAM, GROUP).await.unwrap();
        let codec = EnvelopeCodec::new(
            Arc::new(SchemaRegistry::with_defaults(DEFAULT_COMPATIBILITY_WINDOW)),
            "test",
        );
        let guard = IdempotencyGuard::new(kv, DEFAULT_MARKER_TTL);
        let handler = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            fail_first,
        });
        let config = ConsumerConfig {
            block_ms: 0,
            max_delivery_attempts,
            ..Default::default()
        };
        let consumer = StreamConsumer::new(
            STREAM,
            GROUP,
            bus.clone(),
            codec.clone(),
            guard,
            handler.clone(),
            config,
        );
        Fixture {
            bus,
            codec,
            handler,
            consumer,
        }
    }

    fn event_envelope(codec: &EnvelopeCodec) -> Envelope<WorkflowEvent> {
        let wf = Workflow::new(WorkflowType::Prototype, "app");
        let event = WorkflowEvent::from_workflow(&wf, WorkflowEventKind::Started);
        codec
            .wrap(MessageType::WorkflowEvent, event, Some(wf.trace_id()), None)
            .unwrap()
    }

    #[tokio::test]
    async fn test_success_acks() {
        let f = fixture(0).await;
        let env = event_envelope(&f.codec);
        f.bus.append(STREAM, f.codec.encode(&env).unwrap()).await.unwrap();

        let stats = f.consumer.poll_once().await.unwrap();
        assert_eq!(stats.processed, 1);
        assert_eq!(f.bus.pending_count(STREAM, GROUP).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_envelope_runs_handler_once() {
        let f = fixture(0).await;
        let raw = f.codec.encode(&event_envelope(&f.codec)).unwrap();
        f.bus.append(STREAM, raw.clone()).await.unwrap();
        f.bus.append(STREAM, raw).await.unwrap();

        let stats = f.consumer.poll_once().await.unwrap();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(f.handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.bus.pending_count(STREAM, GROUP).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failure_is_redelivered_then_succeeds() {
        let f = fixture(1).await;
        let raw = f.codec.encode(&event_envelope(&f.codec)).unwrap();
        f.bus.append(STREAM, raw).await.unwrap();

        let first = f.consumer.poll_once().await.unwrap();
        assert_eq!(first.failed, 1);
        assert_eq!(f.bus.pending_count(STREAM, GROUP).await.unwrap(), 1);

        let second = f.consumer.poll_once().await.unwrap();
        assert_eq!(second.processed, 1);
        assert_eq!(f.handler.calls.load(Ordering::SeqCst), 2);
        assert_eq!(f.bus.pending_count(STREAM, GROUP).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_entry_is_dead_lettered() {
        let f = fixture(usize::MAX).await;
        let raw = f.codec.encode(&event_envelope(&f.codec)).unwrap();
        f.bus.append(STREAM, raw).await.unwrap();

        // First delivery plus three retries.
        for _ in 0..4 {
            assert_eq!(f.consumer.poll_once().await.unwrap().failed, 1);
        }
        let last = f.consumer.poll_once().await.unwrap();
        assert_eq!(last.dead_lettered, 1);
        assert_eq!(f.handler.calls.load(Ordering::SeqCst), 4);
        assert_eq!(f.bus.pending_count(STREAM, GROUP).await.unwrap(), 0);

        let dead = f.bus.range(&dead_letter_stream(STREAM)).await.unwrap();
        assert_eq!(dead.len(), 1);
        let env: Envelope<DeadLetterRecord> = f
            .codec
            .decode_as(MessageType::DeadLetter, &dead[0].payload)
            .unwrap();
        assert_eq!(env.payload.attempts, 4);
        assert_eq!(env.payload.source_stream, STREAM);
        assert!(env.payload.reason.contains("db down"));
    }

    #[tokio::test]
    async fn test_meta_attempts_count_toward_ceiling() {
        let f = fixture(0).await;
        let mut env = event_envelope(&f.codec);
        for _ in 0..4 {
            env = f.codec.retry(env, "publisher retry");
        }
        f.bus.append(STREAM, f.codec.encode(&env).unwrap()).await.unwrap();

        let stats = f.consumer.poll_once().await.unwrap();
        assert_eq!(stats.dead_lettered, 1);
        assert_eq!(f.handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_ceiling_of_five_is_exclusive() {
        let f = fixture_with(0, 5).await;
        let mut at_ceiling = event_envelope(&f.codec);
        for _ in 0..5 {
            at_ceiling = f.codec.retry(at_ceiling, "publisher retry");
        }
        assert_eq!(at_ceiling.meta.attempts, 5);
        let mut past_ceiling = event_envelope(&f.codec);
        for _ in 0..6 {
            past_ceiling = f.codec.retry(past_ceiling, "publisher retry");
        }
        assert_eq!(past_ceiling.meta.attempts, 6);

        f.bus.append(STREAM, f.codec.encode(&at_ceiling).unwrap()).await.unwrap();
        f.bus.append(STREAM, f.codec.encode(&past_ceiling).unwrap()).await.unwrap();

        let stats = f.consumer.poll_once().await.unwrap();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.dead_lettered, 1);
        assert_eq!(f.handler.calls.load(Ordering::SeqCst), 1);

        let dead = f.bus.range(&dead_letter_stream(STREAM)).await.unwrap();
        let env: Envelope<DeadLetterRecord> = f
            .codec
            .decode_as(MessageType::DeadLetter, &dead[0].payload)
            .unwrap();
        assert_eq!(env.payload.attempts, 6);
    }

    #[tokio::test]
    async fn test_lost_done_marker_still_acks() {
        let f = fixture_over(0, 3, Arc::new(NoDoneMarkers(InMemoryKvStore::new()))).await;
        let first = f.codec.encode(&event_envelope(&f.codec)).unwrap();
        let second = f.codec.encode(&event_envelope(&f.codec)).unwrap();
        f.bus.append(STREAM, first).await.unwrap();
        f.bus.append(STREAM, second).await.unwrap();

        let stats = f.consumer.poll_once().await.unwrap();
        assert_eq!(stats.processed, 2);
        assert_eq!(f.handler.calls.load(Ordering::SeqCst), 2);
        assert_eq!(f.bus.pending_count(STREAM, GROUP).await.unwrap(), 0);
        assert!(f
            .bus
            .range(&dead_letter_stream(STREAM))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_invalid_envelope_is_never_handled() {
        let f = fixture(0).await;
        f.bus.append(STREAM, "{\"type\":\"workflow.event\"}".into()).await.unwrap();

        for _ in 0..4 {
            assert_eq!(f.consumer.poll_once().await.unwrap().rejected, 1);
        }
        assert_eq!(f.consumer.poll_once().await.unwrap().dead_lettered, 1);
        assert_eq!(f.handler.calls.load(Ordering::SeqCst), 0);

        let dead = f.bus.range(&dead_letter_stream(STREAM)).await.unwrap();
        assert_eq!(dead.len(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let f = fixture(0).await;
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(f.consumer.run(rx));

        let raw = f.codec.encode(&event_envelope(&f.codec)).unwrap();
        f.bus.append(STREAM, raw).await.unwrap();
        for _ in 0..100 {
            if f.handler.calls.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        tx.send(true).unwrap();
        task.await.unwrap();
        assert_eq!(f.handler.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_excerpt_truncates_on_char_boundary() {
        let long = "é".repeat(RAW_EXCERPT_LEN + 10);
        assert_eq!(excerpt(&long).chars().count(), RAW_EXCERPT_LEN);
        assert_eq!(excerpt("short"), "short");
    }
}
