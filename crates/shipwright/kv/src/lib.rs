//! Key-value store adapter
//!
//! Shared mutable state outside the workflow record lives here: idempotency
//! markers, circuit breaker snapshots, counters. Every operation that more
//! than one task may race on is a single atomic primitive
//! (`set_if_not_exists`, `incr`, `compare_and_swap`).

#![deny(unsafe_code)]

pub mod error;
pub mod idempotency;
pub mod memory;
pub mod store;

pub use error::{KvError, Result};
pub use idempotency::{Claim, IdempotencyGuard, DEFAULT_LEASE, DEFAULT_MARKER_TTL};
pub use memory::InMemoryKvStore;
pub use store::{KeyValueStore, KeyValueStoreExt};
