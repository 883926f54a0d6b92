//! In-process window counters
//!
//! Increments are serialised by a mutex, which makes them as atomic as the
//! Redis backend for workers inside one process. Expiry uses tokio's clock so
//! tests can drive it with `tokio::time::advance`.

use super::{StoreError, WindowCounterStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Minimum spacing between sweeps of expired entries
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
struct CounterEntry {
    count: u64,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct CounterMap {
    entries: HashMap<String, CounterEntry>,
    next_sweep: Option<Instant>,
}

impl CounterMap {
    /// Drop every expired entry, at most once per [`SWEEP_INTERVAL`]
    fn sweep(&mut self, now: Instant) {
        if self.next_sweep.map_or(false, |at| now < at) {
            return;
        }
        self.entries.retain(|_, entry| entry.expires_at > now);
        self.next_sweep = Some(now + SWEEP_INTERVAL);
    }
}

/// Mutex-guarded counter map; expired entries are removed on access and by
/// a periodic sweep during increments
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    map: Mutex<CounterMap>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) keys
    pub fn live_keys(&self) -> usize {
        let now = Instant::now();
        self.map
            .lock()
            .map(|map| map.entries.values().filter(|e| e.expires_at > now).count())
            .unwrap_or(0)
    }

    /// Number of entries held, expired or not
    pub fn held_keys(&self) -> usize {
        self.map.lock().map(|map| map.entries.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, CounterMap>, StoreError> {
        self.map
            .lock()
            .map_err(|_| StoreError::Unavailable("counter map lock poisoned".to_string()))
    }
}

#[async_trait]
impl WindowCounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        let now = Instant::now();
        let mut map = self.lock()?;
        map.sweep(now);

        let entry = map.entries.entry(key.to_string()).or_insert(CounterEntry {
            count: 0,
            expires_at: now,
        });

        // Expired entries behave as absent: restart the window.
        if entry.count > 0 && entry.expires_at <= now {
            entry.count = 0;
        }

        entry.count += 1;
        if entry.count == 1 {
            entry.expires_at = now + window;
        }

        Ok(entry.count)
    }

    async fn current(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let now = Instant::now();
        let mut map = self.lock()?;

        match map.entries.get(key) {
            Some(entry) if entry.expires_at > now => Ok(Some(entry.count)),
            Some(_) => {
                map.entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const WINDOW: Duration = Duration::from_secs(10);

    #[tokio::test]
    async fn test_increment_creates_and_counts() {
        let store = MemoryCounterStore::new();

        assert_eq!(store.increment("k", WINDOW).await.unwrap(), 1);
        assert_eq!(store.increment("k", WINDOW).await.unwrap(), 2);
        assert_eq!(store.current("k").await.unwrap(), Some(2));
        assert_eq!(store.current("other").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_is_anchored_at_first_increment() {
        let store = MemoryCounterStore::new();

        store.increment("k", WINDOW).await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(store.increment("k", WINDOW).await.unwrap(), 2);

        // Second hit did not extend the TTL.
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(store.current("k").await.unwrap(), None);
        assert_eq!(store.increment("k", WINDOW).await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_keys_ignores_expired() {
        let store = MemoryCounterStore::new();
        store.increment("a", WINDOW).await.unwrap();
        store.increment("b", Duration::from_secs(1)).await.unwrap();
        assert_eq!(store.live_keys(), 2);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.live_keys(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_are_swept_on_increment() {
        let store = MemoryCounterStore::new();
        for i in 0..10_000 {
            store.increment(&format!("ip-{}", i), WINDOW).await.unwrap();
        }
        assert_eq!(store.held_keys(), 10_000);

        tokio::time::advance(Duration::from_secs(3600)).await;
        store.increment("fresh", WINDOW).await.unwrap();

        assert_eq!(store.held_keys(), 1);
        assert_eq!(store.live_keys(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_keeps_live_entries() {
        let store = MemoryCounterStore::new();
        store.increment("short", Duration::from_secs(1)).await.unwrap();
        store.increment("long", WINDOW).await.unwrap();
        store.increment("long", WINDOW).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.increment("other", WINDOW).await.unwrap(), 1);

        assert_eq!(store.held_keys(), 2);
        assert_eq!(store.current("long").await.unwrap(), Some(2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_distinct() {
        let store = Arc::new(MemoryCounterStore::new());
        let mut handles = Vec::new();

        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.increment("k", WINDOW).await.unwrap()
            }));
        }

        let mut seen = Vec::new();
        for handle in handles {
            seen.push(handle.await.unwrap());
        }
        seen.sort_unstable();
        assert_eq!(seen, (1..=50).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_ping() {
        tokio_test::assert_ok!(MemoryCounterStore::new().ping().await);
    }
}
