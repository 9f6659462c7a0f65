//! In-memory key-value store for development and testing.
//!
//! Expiry is lazy: a key past its deadline is treated as absent and removed
//! by the next operation that touches it. Deadlines use the tokio clock, so
//! paused-time tests control expiry.

use crate::error::{KvError, Result};
use crate::store::KeyValueStore;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Clone, Debug)]
struct Slot {
    value: String,
    expires_at: Option<Instant>,
}

impl Slot {
    fn new(value: String, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|t| Instant::now() + t),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-memory [`KeyValueStore`].
#[derive(Clone, Default)]
pub struct InMemoryKvStore {
    slots: Arc<DashMap<String, Slot>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.slots.iter().filter(|s| s.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired key.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.slots.len();
        self.slots.retain(|_, slot| slot.is_live(now));
        before - self.slots.len()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        if let Some(slot) = self.slots.get(key) {
            if slot.is_live(now) {
                return Ok(Some(slot.value.clone()));
            }
        }
        self.slots.remove_if(key, |_, slot| !slot.is_live(now));
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        self.slots.insert(key.to_string(), Slot::new(value, ttl));
        Ok(())
    }

    async fn set_if_not_exists(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        let now = Instant::now();
        match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    Ok(false)
                } else {
                    occupied.insert(Slot::new(value, ttl));
                    Ok(true)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::new(value, ttl));
                Ok(true)
            }
        }
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<i64> {
        let now = Instant::now();
        match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                let current = if slot.is_live(now) {
                    slot.value.parse::<i64>().map_err(|_| KvError::NotAnInteger {
                        key: key.to_string(),
                        value: slot.value.clone(),
                    })?
                } else {
                    slot.expires_at = None;
                    0
                };
                let next = current
                    .checked_add(delta)
                    .ok_or_else(|| KvError::Overflow(key.to_string()))?;
                slot.value = next.to_string();
                Ok(next)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::new(delta.to_string(), None));
                Ok(delta)
            }
        }
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: String,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        let now = Instant::now();
        match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let current = occupied
                    .get()
                    .is_live(now)
                    .then(|| occupied.get().value.as_str());
                if current == expected {
                    occupied.insert(Slot::new(new, ttl));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                if expected.is_none() {
                    vacant.insert(Slot::new(new, ttl));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .slots
            .remove(key)
            .map_or(false, |(_, slot)| slot.is_live(now)))
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let now = Instant::now();
        Ok(self.slots.get(key).and_then(|slot| {
            if !slot.is_live(now) {
                return None;
            }
            slot.expires_at.map(|at| at.saturating_duration_since(now))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_if_not_exists_is_exclusive() {
        let kv = InMemoryKvStore::new();
        assert!(kv.set_if_not_exists("k", "a".into(), None).await.unwrap());
        assert!(!kv.set_if_not_exists("k", "b".into(), None).await.unwrap());
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let kv = InMemoryKvStore::new();
        kv.set("k", "v".into(), Some(Duration::from_secs(10)))
            .await
            .unwrap();
        assert_eq!(kv.ttl("k").await.unwrap(), Some(Duration::from_secs(10)));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(kv.get("k").await.unwrap(), None);
        assert!(kv.set_if_not_exists("k", "w".into(), None).await.unwrap());
        assert_eq!(kv.ttl("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_incr() {
        let kv = InMemoryKvStore::new();
        assert_eq!(kv.incr("c", 5).await.unwrap(), 5);
        assert_eq!(kv.incr("c", -2).await.unwrap(), 3);

        kv.set("s", "text".into(), None).await.unwrap();
        assert!(matches!(
            kv.incr("s", 1).await,
            Err(KvError::NotAnInteger { .. })
        ));
    }

    #[tokio::test]
    async fn test_compare_and_swap() {
        let kv = InMemoryKvStore::new();
        assert!(kv.compare_and_swap("k", None, "1".into(), None).await.unwrap());
        assert!(!kv.compare_and_swap("k", None, "2".into(), None).await.unwrap());
        assert!(!kv.compare_and_swap("k", Some("0"), "2".into(), None).await.unwrap());
        assert!(kv.compare_and_swap("k", Some("1"), "2".into(), None).await.unwrap());
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_concurrent_claims_have_one_winner() {
        let kv = InMemoryKvStore::new();
        let mut handles = Vec::new();
        for i in 0..32 {
            let kv = kv.clone();
            handles.push(tokio::spawn(async move {
                kv.set_if_not_exists("seen:x", i.to_string(), None).await.unwrap()
            }));
        }
        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_delete() {
        let kv = InMemoryKvStore::new();
        kv.set("k", "v".into(), None).await.unwrap();
        assert!(kv.delete("k").await.unwrap());
        assert!(!kv.delete("k").await.unwrap());
    }
}
