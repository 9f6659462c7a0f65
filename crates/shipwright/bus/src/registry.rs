//! Process-wide subscription registry.

use crate::error::{BusError, Result};
use dashmap::DashSet;

/// Guarantees at most one handler per `(stream, group)` for the lifetime of
/// the process. Two handlers on the same group would compete for entries and
/// apply effects twice.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    active: DashSet<(String, String)>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, stream: &str, group: &str) -> Result<()> {
        if self.active.insert((stream.to_string(), group.to_string())) {
            tracing::debug!(stream = %stream, group = %group, "Subscription registered");
            Ok(())
        } else {
            Err(BusError::AlreadySubscribed {
                stream: stream.to_string(),
                group: group.to_string(),
            })
        }
    }

    pub fn is_registered(&self, stream: &str, group: &str) -> bool {
        self.active
            .contains(&(stream.to_string(), group.to_string()))
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_registration_fails() {
        let registry = SubscriptionRegistry::new();
        registry.register("shipwright:results", "orchestrator").unwrap();
        let err = registry
            .register("shipwright:results", "orchestrator")
            .unwrap_err();
        assert!(matches!(err, BusError::AlreadySubscribed { .. }));

        // A different group on the same stream is fine.
        registry.register("shipwright:results", "audit").unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.is_registered("shipwright:results", "audit"));
    }
}
