//! Window counter storage
//!
//! Per-source failure counters live in an external store that offers an
//! atomic increment and a per-key TTL. The detector never keeps its own
//! copy of a count; every update goes through [`WindowCounterStore`] so that
//! several workers (or several processes) stay consistent.

pub mod memory;
pub mod redis_store;

pub use memory::MemoryCounterStore;
pub use redis_store::RedisCounterStore;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while talking to the counter store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Counter store returned an invalid value: {0}")]
    InvalidData(String),

    #[error("Counter store unavailable: {0}")]
    Unavailable(String),
}

/// Trait for window counter backends
#[async_trait]
pub trait WindowCounterStore: Send + Sync {
    /// Atomically increment the counter at `key` and return the new value.
    ///
    /// When the increment creates the key (the returned value is 1) the key
    /// is given a TTL of `window` in the same atomic step. Later increments
    /// leave the TTL untouched, so the window is anchored at the first hit.
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, StoreError>;

    /// Read the current value without modifying it
    async fn current(&self, key: &str) -> Result<Option<u64>, StoreError>;

    /// Round-trip check used at startup
    async fn ping(&self) -> Result<(), StoreError>;
}
