//! Pluggable cache stores.
//!
//! The store contract is asynchronous so custom stores may be
//! network-backed; the default store is in-memory with TTL expiry and FIFO
//! eviction (insertion-ordered, reads do not refresh recency).

use crate::error::Result;
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::time::{Duration, Instant};

pub const DEFAULT_CACHE_MAX_SIZE: usize = 1_000;

/// Key/value store used by the cache middleware.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    /// `ttl_secs == 0` means "expires immediately": the entry is unusable
    /// on any subsequent read.
    async fn set(&self, key: &str, value: Value, ttl_secs: u64) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

/// Default in-memory store.
///
/// Backed by an insertion-ordered map; when full, inserting a new key
/// evicts the oldest entry. Updating an existing key neither evicts nor
/// changes its position. Expired entries are purged lazily on read.
pub struct MemoryCacheStore {
    entries: Mutex<IndexMap<String, CacheEntry>>,
    max_size: usize,
}

impl MemoryCacheStore {
    /// `max_size` is clamped to at least 1.
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: Mutex::new(IndexMap::new()),
            max_size: max_size.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_MAX_SIZE)
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get(key) else {
            return Ok(None);
        };
        if Instant::now() >= entry.expires_at {
            entries.shift_remove(key);
            return Ok(None);
        }
        Ok(Some(entry.value.clone()))
    }

    async fn set(&self, key: &str, value: Value, ttl_secs: u64) -> Result<()> {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + Duration::from_secs(ttl_secs),
        };

        let mut entries = self.entries.lock();
        if !entries.contains_key(key) && entries.len() >= self.max_size {
            entries.shift_remove_index(0);
        }
        entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().shift_remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn get_returns_what_set_stored() {
        let store = MemoryCacheStore::new(4);
        store.set("k", json!({"v": 1}), 60).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(json!({"v": 1})));
    }

    #[tokio::test]
    async fn zero_ttl_entries_are_unusable() {
        let store = MemoryCacheStore::new(4);
        store.set("k", json!(1), 0).await.unwrap();
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(store.get("k").await.unwrap(), None);
        // Lazily purged on the read.
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn inserting_past_capacity_evicts_the_oldest_key() {
        let store = MemoryCacheStore::new(3);
        for key in ["a", "b", "c", "d"] {
            store.set(key, json!(key), 60).await.unwrap();
        }
        assert_eq!(store.len(), 3);
        assert_eq!(store.get("a").await.unwrap(), None);
        assert_eq!(store.get("b").await.unwrap(), Some(json!("b")));
        assert_eq!(store.get("d").await.unwrap(), Some(json!("d")));
    }

    #[tokio::test]
    async fn updating_an_existing_key_does_not_evict() {
        let store = MemoryCacheStore::new(2);
        store.set("a", json!(1), 60).await.unwrap();
        store.set("b", json!(2), 60).await.unwrap();
        store.set("a", json!(3), 60).await.unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.get("a").await.unwrap(), Some(json!(3)));
        assert_eq!(store.get("b").await.unwrap(), Some(json!(2)));

        // "a" kept its original position, so it is still evicted first.
        store.set("c", json!(4), 60).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
        assert_eq!(store.get("b").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn delete_removes_the_entry() {
        let store = MemoryCacheStore::new(2);
        store.set("a", json!(1), 60).await.unwrap();
        store.delete("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn max_size_is_clamped_to_one() {
        let store = MemoryCacheStore::new(0);
        store.set("a", json!(1), 60).await.unwrap();
        store.set("b", json!(2), 60).await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("b").await.unwrap(), Some(json!(2)));
    }
}
