//! In-memory TTL cache store
//!
//! The sole shared mutable state between components. Keys are namespaced
//! per owning concern (`holders:*`, `identity:*`, `balance:*`,
//! `portfolio:*`, `floor:*`, `alerts:recent`, `events:*`); no component
//! writes another component's namespace.

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Cache entry with absolute expiry
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

/// Cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Namespaced key/value store with per-entry expiry.
///
/// Eviction is lazy on read plus an explicit `sweep()`; an expired entry is
/// never returned. Per-key set/get are atomic (DashMap); there are no
/// cross-key transactions.
pub struct CacheStore {
    entries: DashMap<String, CacheEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStore {
    /// Create an empty cache store
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Store a value under `key` for `ttl`
    pub fn set(&self, key: &str, value: Value, ttl: Duration) {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Serialize and store a typed value
    pub fn set_as<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        match serde_json::to_value(value) {
            Ok(v) => self.set(key, v, ttl),
            Err(e) => debug!(target: "CACHE", "Failed to serialize value for {}: {}", key, e),
        }
    }

    /// Get a value, evicting it first if expired
    pub fn get(&self, key: &str) -> Option<Value> {
        let expired = match self.entries.get(key) {
            Some(entry) => {
                if entry.expires_at > Instant::now() {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.value.clone());
                }
                true
            }
            None => false,
        };

        if expired {
            self.entries.remove(key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Get and deserialize a typed value
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key)?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                debug!(target: "CACHE", "Failed to deserialize cached value for {}: {}", key, e);
                None
            }
        }
    }

    /// Remove a single entry
    pub fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Remove all expired entries
    pub fn sweep(&self) {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        let swept = before - self.entries.len();
        if swept > 0 {
            self.evictions.fetch_add(swept as u64, Ordering::Relaxed);
            debug!(target: "CACHE", "Swept {} expired entries", swept);
        }
    }

    /// Current statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_then_get_round_trips() {
        let cache = CacheStore::new();
        cache.set("holders:ledger", json!({"a": 1}), Duration::from_secs(60));
        assert_eq!(cache.get("holders:ledger"), Some(json!({"a": 1})));
    }

    #[test]
    fn expired_entry_is_never_returned() {
        let cache = CacheStore::new();
        cache.set("floor:last", json!(5.0), Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(25));
        assert!(cache.get("floor:last").is_none());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn typed_round_trip() {
        let cache = CacheStore::new();
        cache.set_as("balance:0xabc", &"12.5".to_string(), Duration::from_secs(60));
        assert_eq!(
            cache.get_as::<String>("balance:0xabc"),
            Some("12.5".to_string())
        );
    }

    #[test]
    fn namespaced_keys_do_not_collide() {
        let cache = CacheStore::new();
        cache.set("identity:0xabc", json!("vitalik.eth"), Duration::from_secs(60));
        cache.set("balance:0xabc", json!("3.2"), Duration::from_secs(60));
        assert_eq!(cache.get("identity:0xabc"), Some(json!("vitalik.eth")));
        assert_eq!(cache.get("balance:0xabc"), Some(json!("3.2")));
    }

    #[test]
    fn delete_and_clear() {
        let cache = CacheStore::new();
        cache.set("a", json!(1), Duration::from_secs(60));
        cache.set("b", json!(2), Duration::from_secs(60));
        cache.delete("a");
        assert!(cache.get("a").is_none());
        cache.clear();
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn sweep_drops_only_expired() {
        let cache = CacheStore::new();
        cache.set("old", json!(1), Duration::from_millis(5));
        cache.set("fresh", json!(2), Duration::from_secs(60));
        std::thread::sleep(Duration::from_millis(20));
        cache.sweep();
        assert_eq!(cache.stats().entries, 1);
        assert_eq!(cache.get("fresh"), Some(json!(2)));
    }
}
