//! TTL Cache Store
//!
//! Typed JSON cache over moka with a per-entry TTL. Backs the active-session
//! snapshots, ended-session retention, report flags, and recent-match
//! cooldown lists.

use moka::future::Cache;
use moka::Expiry;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Cache statistics
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub entries: u64,
    pub hits: u64,
    pub misses: u64,
}

/// A cached JSON payload carrying its own expiry.
#[derive(Debug, Clone)]
struct CacheEntry {
    payload: String,
    /// None = lives until explicitly removed (active sessions).
    ttl: Option<Duration>,
}

/// Drives moka's expiration from the entry's own TTL field.
struct PerEntryExpiry;

impl Expiry<String, CacheEntry> for PerEntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        // Re-inserting resets the clock to the new entry's TTL.
        value.ttl
    }
}

/// TTL-bound key-value store for session state.
#[derive(Clone)]
pub struct TtlCache {
    cache: Cache<String, CacheEntry>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl TtlCache {
    pub fn new(max_entries: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(PerEntryExpiry)
            .build();

        Self {
            cache,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Store a value with a TTL. `None` keeps it until removed.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        let payload = match serde_json::to_string(value) {
            Ok(p) => p,
            Err(e) => {
                warn!("Cache SET {} failed to serialize: {}", key, e);
                return;
            }
        };

        self.cache.insert(key.to_string(), CacheEntry { payload, ttl }).await;
        debug!("Cache SET: {}", key);
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.cache.get(key).await {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                match serde_json::from_str(&entry.payload) {
                    Ok(v) => Some(v),
                    Err(e) => {
                        warn!("Cache GET {} failed to deserialize: {}", key, e);
                        None
                    }
                }
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.cache.get(key).await.is_some()
    }

    pub async fn remove(&self, key: &str) {
        self.cache.invalidate(key).await;
        debug!("Cache DEL: {}", key);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.cache.entry_count(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Key for the active session snapshot of a channel.
pub fn active_call_key(channel_id: &str) -> String {
    format!("call:active:{channel_id}")
}

/// Key for an ended session snapshot kept for moderation review.
pub fn ended_call_key(session_id: &str) -> String {
    format!("call:ended:{session_id}")
}

/// Key for the report flag consulted at hangup time.
pub fn report_flag_key(session_id: &str) -> String {
    format!("call:report:{session_id}")
}

/// Key for a user's recent-match cooldown list.
pub fn recent_match_key(user_id: &str) -> String {
    format!("call:recent:{user_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_remove() {
        let cache = TtlCache::new(100);

        assert!(cache.get::<String>("k").await.is_none());

        cache.set("k", &"hello".to_string(), None).await;
        assert_eq!(cache.get::<String>("k").await.unwrap(), "hello");

        cache.remove("k").await;
        assert!(cache.get::<String>("k").await.is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
    }

    #[tokio::test]
    async fn test_per_entry_ttl_expiry() {
        let cache = TtlCache::new(100);

        cache.set("short", &1u32, Some(Duration::from_millis(50))).await;
        cache.set("long", &2u32, Some(Duration::from_secs(60))).await;

        assert_eq!(cache.get::<u32>("short").await, Some(1));

        tokio::time::sleep(Duration::from_millis(120)).await;

        assert_eq!(cache.get::<u32>("short").await, None);
        assert_eq!(cache.get::<u32>("long").await, Some(2));
    }

    #[tokio::test]
    async fn test_reinsert_resets_ttl() {
        let cache = TtlCache::new(100);

        cache.set("k", &1u32, Some(Duration::from_millis(80))).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Re-insert restarts the clock.
        cache.set("k", &2u32, Some(Duration::from_millis(80))).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(cache.get::<u32>("k").await, Some(2));
    }

    #[test]
    fn test_key_shapes() {
        assert_eq!(active_call_key("123"), "call:active:123");
        assert_eq!(ended_call_key("abc"), "call:ended:abc");
        assert_eq!(report_flag_key("abc"), "call:report:abc");
        assert_eq!(recent_match_key("u1"), "call:recent:u1");
    }
}
