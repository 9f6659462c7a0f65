//! Key-value store trait.

use crate::error::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// String-valued store with optional per-key TTL.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Unconditional write. `ttl = None` keeps the value until deleted.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;

    /// Atomic create. Returns true when this call created the key.
    async fn set_if_not_exists(&self, key: &str, value: String, ttl: Option<Duration>)
        -> Result<bool>;

    /// Atomic add; a missing key counts as 0. Returns the new value.
    async fn incr(&self, key: &str, delta: i64) -> Result<i64>;

    /// Atomic swap: writes `new` only when the current value equals
    /// `expected` (`None` meaning absent).
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: String,
        ttl: Option<Duration>,
    ) -> Result<bool>;

    /// Returns true when a live key was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remaining lifetime. `None` when the key is absent or has no expiry.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;
}

/// JSON helpers over any [`KeyValueStore`].
#[async_trait]
pub trait KeyValueStoreExt: KeyValueStore {
    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set_json<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.set(key, raw, ttl).await
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueStoreExt for S {}
