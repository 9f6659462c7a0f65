//! Named circuit breakers shared across callers.

use crate::circuit_breaker::{BreakerSnapshot, CircuitBreaker};
use crate::config::CircuitBreakerConfig;
use dashmap::DashMap;
use shipwright_kv::{KeyValueStore, KeyValueStoreExt, Result as KvResult};
use std::sync::Arc;
use std::time::Duration;

const SNAPSHOT_PREFIX: &str = "breaker:";

/// Lazily creates one [`CircuitBreaker`] per name. When a KV store is
/// attached, snapshots are written under `breaker:<name>` so other
/// processes can see which dependencies are tripped.
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    default_config: CircuitBreakerConfig,
    store: Option<Arc<dyn KeyValueStore>>,
    snapshot_ttl: Option<Duration>,
}

impl BreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            default_config,
            store: None,
            snapshot_ttl: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>, ttl: Option<Duration>) -> Self {
        self.store = Some(store);
        self.snapshot_ttl = ttl;
        self
    }

    pub fn snapshot_key(name: &str) -> String {
        format!("{}{}", SNAPSHOT_PREFIX, name)
    }

    /// The breaker for `name`, created with the default config on first use.
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, self.default_config.clone())))
            .value()
            .clone()
    }

    /// Register a breaker with its own config, replacing any existing one.
    pub fn register(&self, name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        let breaker = Arc::new(CircuitBreaker::new(name, config));
        self.breakers.insert(name.to_string(), breaker.clone());
        breaker
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.iter().map(|b| b.key().clone()).collect();
        names.sort();
        names
    }

    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<BreakerSnapshot> =
            self.breakers.iter().map(|b| b.value().snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Write every snapshot to the attached store. No-op without one.
    pub async fn publish_snapshots(&self) -> KvResult<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let snapshots = self.snapshots();
        for snapshot in &snapshots {
            store
                .set_json(&Self::snapshot_key(&snapshot.name), snapshot, self.snapshot_ttl)
                .await?;
        }
        Ok(snapshots.len())
    }

    /// Read a snapshot published by any process.
    pub async fn load_snapshot(&self, name: &str) -> KvResult<Option<BreakerSnapshot>> {
        match &self.store {
            Some(store) => store.get_json(&Self::snapshot_key(name)).await,
            None => Ok(None),
        }
    }
}
