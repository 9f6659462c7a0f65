//! In-memory bus for development and testing.
//!
//! Topics are tokio broadcast channels. Streams keep up to `max_len` entries
//! (oldest trimmed first, like `XADD ... MAXLEN`), one pending-entry list per
//! consumer group, and wake blocked readers through a [`Notify`]. Idle time
//! is measured on the tokio clock.

use crate::error::{BusError, Result};
use crate::traits::{DurableStream, PubSub, StreamEntry};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::time::Instant;
use tracing::warn;

/// Default per-topic broadcast buffer.
pub const DEFAULT_TOPIC_CAPACITY: usize = 1024;

/// Default cap on entries kept per stream.
pub const DEFAULT_STREAM_MAX_LEN: usize = 10_000;

#[derive(Debug)]
struct PendingEntry {
    consumer: String,
    delivered_at: Instant,
    delivery_count: u32,
    last_error: Option<String>,
    failed: bool,
}

#[derive(Debug, Default)]
struct GroupState {
    last_delivered: u64,
    pending: BTreeMap<u64, PendingEntry>,
}

#[derive(Debug, Default)]
struct StreamState {
    next_seq: u64,
    entries: BTreeMap<u64, String>,
    groups: HashMap<String, GroupState>,
}

#[derive(Debug, Default)]
struct StreamHandle {
    state: Mutex<StreamState>,
    notify: Notify,
}

fn entry_id(seq: u64) -> String {
    format!("{}-0", seq)
}

fn parse_entry_id(id: &str) -> Option<u64> {
    id.split('-').next()?.parse().ok()
}

impl StreamState {
    /// Drop the oldest entries beyond `max_len`. Returns how many were
    /// trimmed and how many of those were still pending in some group.
    fn trim(&mut self, max_len: usize) -> (usize, usize) {
        let mut trimmed = 0;
        let mut unacked = 0;
        while self.entries.len() > max_len {
            let Some((seq, _)) = self.entries.pop_first() else {
                break;
            };
            trimmed += 1;
            for group in self.groups.values_mut() {
                if group.pending.remove(&seq).is_some() {
                    unacked += 1;
                }
            }
        }
        (trimmed, unacked)
    }

    fn group_mut(&mut self, stream: &str, group: &str) -> Result<&mut GroupState> {
        self.groups
            .get_mut(group)
            .ok_or_else(|| BusError::UnknownGroup {
                stream: stream.to_string(),
                group: group.to_string(),
            })
    }

    fn deliver_new(
        &mut self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let now = Instant::now();
        let state = self
            .groups
            .get_mut(group)
            .ok_or_else(|| BusError::UnknownGroup {
                stream: stream.to_string(),
                group: group.to_string(),
            })?;

        let mut delivered = Vec::new();
        for (&seq, payload) in self.entries.range(state.last_delivered + 1..).take(count) {
            state.last_delivered = seq;
            state.pending.insert(
                seq,
                PendingEntry {
                    consumer: consumer.to_string(),
                    delivered_at: now,
                    delivery_count: 1,
                    last_error: None,
                    failed: false,
                },
            );
            delivered.push(StreamEntry {
                id: entry_id(seq),
                payload: payload.clone(),
                delivery_count: 1,
                last_error: None,
            });
        }
        Ok(delivered)
    }
}

/// In-memory implementation of [`PubSub`] and [`DurableStream`].
#[derive(Clone)]
pub struct InMemoryBus {
    topics: Arc<DashMap<String, broadcast::Sender<String>>>,
    streams: Arc<DashMap<String, Arc<StreamHandle>>>,
    topic_capacity: usize,
    max_len: usize,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::with_topic_capacity(DEFAULT_TOPIC_CAPACITY)
    }

    pub fn with_topic_capacity(topic_capacity: usize) -> Self {
        Self {
            topics: Arc::new(DashMap::new()),
            streams: Arc::new(DashMap::new()),
            topic_capacity: topic_capacity.max(1),
            max_len: DEFAULT_STREAM_MAX_LEN,
        }
    }

    /// Cap every stream at `max_len` entries.
    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len.max(1);
        self
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    fn stream(&self, name: &str) -> Arc<StreamHandle> {
        self.streams
            .entry(name.to_string())
            .or_default()
            .value()
            .clone()
    }

    fn existing(&self, name: &str) -> Option<Arc<StreamHandle>> {
        self.streams.get(name).map(|h| h.value().clone())
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<String> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.topic_capacity).0)
            .value()
            .clone()
    }

    /// Names of every stream created so far.
    pub fn stream_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.streams.iter().map(|s| s.key().clone()).collect();
        names.sort();
        names
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSub for InMemoryBus {
    async fn publish(&self, topic: &str, message: String) -> Result<usize> {
        // No receivers is not an error for pub/sub.
        Ok(self.sender(topic).send(message).unwrap_or(0))
    }

    fn subscribe(&self, topic: &str) -> broadcast::Receiver<String> {
        self.sender(topic).subscribe()
    }
}

#[async_trait]
impl DurableStream for InMemoryBus {
    async fn append(&self, stream: &str, payload: String) -> Result<String> {
        let handle = self.stream(stream);
        let (id, unacked) = {
            let mut state = handle.state.lock().await;
            state.next_seq += 1;
            let seq = state.next_seq;
            state.entries.insert(seq, payload);
            let (_, unacked) = state.trim(self.max_len);
            (entry_id(seq), unacked)
        };
        if unacked > 0 {
            warn!(stream, unacked, max_len = self.max_len, "Trimmed unacknowledged stream entries");
        }
        handle.notify.notify_waiters();
        Ok(id)
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> Result<()> {
        let handle = self.stream(stream);
        let mut state = handle.state.lock().await;
        state.groups.entry(group.to_string()).or_default();
        Ok(())
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>> {
        let handle = self.stream(stream);
        let deadline = Instant::now() + block;
        loop {
            // Registered before the check so an append in between still wakes us.
            let notified = handle.notify.notified();
            {
                let mut state = handle.state.lock().await;
                let delivered = state.deliver_new(stream, group, consumer, count)?;
                if !delivered.is_empty() {
                    return Ok(delivered);
                }
            }
            if Instant::now() >= deadline
                || tokio::time::timeout_at(deadline, notified).await.is_err()
            {
                return Ok(Vec::new());
            }
        }
    }

    async fn claim_idle(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let handle = self.stream(stream);
        let mut guard = handle.state.lock().await;
        let state = &mut *guard;
        let now = Instant::now();
        let entries = &state.entries;
        let group_state = state
            .groups
            .get_mut(group)
            .ok_or_else(|| BusError::UnknownGroup {
                stream: stream.to_string(),
                group: group.to_string(),
            })?;

        let mut claimed = Vec::new();
        for (seq, pending) in group_state.pending.iter_mut() {
            if claimed.len() >= count {
                break;
            }
            let idle = now.saturating_duration_since(pending.delivered_at);
            if !pending.failed && idle < min_idle {
                continue;
            }
            let Some(payload) = entries.get(seq) else {
                continue;
            };
            pending.consumer = consumer.to_string();
            pending.delivered_at = now;
            pending.delivery_count = pending.delivery_count.saturating_add(1);
            pending.failed = false;
            claimed.push(StreamEntry {
                id: entry_id(*seq),
                payload: payload.clone(),
                delivery_count: pending.delivery_count,
                last_error: pending.last_error.clone(),
            });
        }
        Ok(claimed)
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> Result<usize> {
        let Some(handle) = self.existing(stream) else {
            return Ok(0);
        };
        let mut state = handle.state.lock().await;
        let group_state = state.group_mut(stream, group)?;
        Ok(ids
            .iter()
            .filter_map(|id| parse_entry_id(id))
            .filter(|seq| group_state.pending.remove(seq).is_some())
            .count())
    }

    async fn record_failure(
        &self,
        stream: &str,
        group: &str,
        id: &str,
        error: &str,
    ) -> Result<()> {
        let Some(handle) = self.existing(stream) else {
            return Ok(());
        };
        let mut state = handle.state.lock().await;
        let group_state = state.group_mut(stream, group)?;
        if let Some(pending) = parse_entry_id(id).and_then(|seq| group_state.pending.get_mut(&seq)) {
            pending.last_error = Some(error.to_string());
            pending.failed = true;
        }
        Ok(())
    }

    async fn pending_count(&self, stream: &str, group: &str) -> Result<usize> {
        let Some(handle) = self.existing(stream) else {
            return Ok(0);
        };
        let mut state = handle.state.lock().await;
        Ok(state.group_mut(stream, group)?.pending.len())
    }

    async fn len(&self, stream: &str) -> Result<usize> {
        match self.existing(stream) {
            Some(handle) => Ok(handle.state.lock().await.entries.len()),
            None => Ok(0),
        }
    }

    async fn range(&self, stream: &str) -> Result<Vec<StreamEntry>> {
        let Some(handle) = self.existing(stream) else {
            return Ok(Vec::new());
        };
        let state = handle.state.lock().await;
        Ok(state
            .entries
            .iter()
            .map(|(seq, payload)| StreamEntry {
                id: entry_id(*seq),
                payload: payload.clone(),
                delivery_count: 0,
                last_error: None,
            })
            .collect())
    }
}
