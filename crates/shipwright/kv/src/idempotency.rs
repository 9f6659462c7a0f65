//! Idempotency markers keyed by envelope id.
//!
//! A consumer claims `seen:<envelope_id>` before running its handler. The
//! claim starts as a short in-flight lease; [`IdempotencyGuard::complete`]
//! turns it into a long-lived done marker. A failed handler releases the
//! lease so the redelivery is processed instead of being skipped. A lease
//! left behind by a crashed consumer expires on its own.

use crate::error::Result;
use crate::store::KeyValueStore;
use shipwright_types::EnvelopeId;
use std::sync::Arc;
use std::time::Duration;

/// Default done-marker lifetime (24h); must exceed the longest redelivery horizon.
pub const DEFAULT_MARKER_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default in-flight lease.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(10 * 60);

const MARKER_PREFIX: &str = "seen:";
const IN_FLIGHT: &str = "in_flight";
const DONE: &str = "done";

/// Outcome of [`IdempotencyGuard::claim`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Claim {
    /// First sighting; the caller owns the effect.
    Acquired,
    /// Effect already applied; skip and ack.
    AlreadySeen,
    /// Another consumer holds the lease; leave the entry pending.
    InFlight,
}

#[derive(Clone)]
pub struct IdempotencyGuard {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
    lease: Duration,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            lease: DEFAULT_LEASE.min(ttl),
        }
    }

    /// Lease length for in-flight claims. Should exceed the handler timeout.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn marker_key(id: &EnvelopeId) -> String {
        format!("{}{}", MARKER_PREFIX, id)
    }

    pub async fn claim(&self, id: &EnvelopeId) -> Result<Claim> {
        let key = Self::marker_key(id);
        let acquired = self
            .store
            .set_if_not_exists(&key, IN_FLIGHT.to_string(), Some(self.lease))
            .await?;
        if acquired {
            return Ok(Claim::Acquired);
        }
        match self.store.get(&key).await?.as_deref() {
            Some(IN_FLIGHT) => Ok(Claim::InFlight),
            // Lease expired between the two calls; the next delivery retries.
            None => Ok(Claim::InFlight),
            Some(_) => {
                tracing::debug!(envelope_id = %id, "Duplicate envelope");
                Ok(Claim::AlreadySeen)
            }
        }
    }

    /// Mark the effect as applied.
    pub async fn complete(&self, id: &EnvelopeId) -> Result<()> {
        self.store
            .set(&Self::marker_key(id), DONE.to_string(), Some(self.ttl))
            .await
    }

    /// Drop a claim whose handler failed.
    pub async fn release(&self, id: &EnvelopeId) -> Result<()> {
        self.store.delete(&Self::marker_key(id)).await?;
        Ok(())
    }

    /// True once the effect has been applied.
    pub async fn is_seen(&self, id: &EnvelopeId) -> Result<bool> {
        Ok(self.store.get(&Self::marker_key(id)).await?.as_deref() == Some(DONE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryKvStore;

    fn guard() -> IdempotencyGuard {
        IdempotencyGuard::new(Arc::new(InMemoryKvStore::new()), DEFAULT_MARKER_TTL)
    }

    #[tokio::test]
    async fn test_completed_claim_is_duplicate() {
        let guard = guard();
        let id = EnvelopeId::generate();
        assert_eq!(guard.claim(&id).await.unwrap(), Claim::Acquired);
        assert_eq!(guard.claim(&id).await.unwrap(), Claim::InFlight);
        assert!(!guard.is_seen(&id).await.unwrap());

        guard.complete(&id).await.unwrap();
        assert_eq!(guard.claim(&id).await.unwrap(), Claim::AlreadySeen);
        assert!(guard.is_seen(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_allows_reprocessing() {
        let guard = guard();
        let id = EnvelopeId::generate();
        guard.claim(&id).await.unwrap();
        guard.release(&id).await.unwrap();
        assert!(!guard.is_seen(&id).await.unwrap());
        assert_eq!(guard.claim(&id).await.unwrap(), Claim::Acquired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_lease_expires() {
        let guard = guard().with_lease(Duration::from_secs(30));
        let id = EnvelopeId::generate();
        guard.claim(&id).await.unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(guard.claim(&id).await.unwrap(), Claim::Acquired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_done_marker_expires() {
        let guard = IdempotencyGuard::new(
            Arc::new(InMemoryKvStore::new()),
            Duration::from_secs(60),
        );
        let id = EnvelopeId::generate();
        guard.claim(&id).await.unwrap();
        guard.complete(&id).await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(guard.claim(&id).await.unwrap(), Claim::Acquired);
    }
}
