//! Response cache
//!
//! Resource-type-aware store with per-type TTLs, a bounded entry count
//! and least-recently-touched eviction. Expired entries are removed on
//! access, never served.

use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::resource::ResourceType;

use super::keys::CacheKey;

/// Configuration for the response cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries before eviction (default: 500)
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_entries: 500 }
    }
}

impl CacheConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(val) = std::env::var("CACHE_MAX_ENTRIES") {
            if let Ok(n) = val.parse::<usize>() {
                if n > 0 {
                    config.max_entries = n;
                }
            }
        }
        config
    }
}

/// Cached response payload
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

/// One stored entry; TTL is resolved at insert and immutable after
struct CacheSlot {
    response: CachedResponse,
    resource_type: ResourceType,
    created_at: Instant,
    ttl: Duration,
    last_touched: Instant,
}

impl CacheSlot {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) >= self.ttl
    }
}

/// Running cache counters
#[derive(Debug, Clone, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    pub max_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl CacheStats {
    /// Hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Resource-type-aware TTL/LRU response cache
pub struct ResponseCache {
    entries: DashMap<String, CacheSlot>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    config: CacheConfig,
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        debug!(max_entries = config.max_entries, "ResponseCache initialized");
        Self {
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            config,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(CacheConfig::default())
    }

    /// Look up a response; a hit refreshes the entry's recency
    ///
    /// Expired entries are physically removed and reported as misses.
    pub fn get(&self, key: &CacheKey) -> Option<CachedResponse> {
        let storage_key = key.to_storage_key();
        let now = Instant::now();

        let mut expired = false;
        if let Some(mut slot) = self.entries.get_mut(&storage_key) {
            if !slot.is_expired(now) {
                slot.last_touched = now;
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Cache hit");
                return Some(slot.response.clone());
            }
            expired = true;
        }

        if expired {
            self.entries.remove(&storage_key);
            self.expirations.fetch_add(1, Ordering::Relaxed);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, "Cache miss");
        None
    }

    /// Store a response; the TTL is taken from the resource type's table
    pub fn insert(&self, key: &CacheKey, response: CachedResponse, resource_type: ResourceType) {
        let storage_key = key.to_storage_key();
        let is_new = !self.entries.contains_key(&storage_key);

        if is_new {
            while self.entries.len() >= self.config.max_entries {
                if !self.evict_lru() {
                    break;
                }
            }
        }

        let now = Instant::now();
        let ttl = resource_type.ttl();
        debug!(
            key = %key,
            resource_type = %resource_type,
            ttl_secs = ttl.as_secs(),
            "Cached response"
        );
        self.entries.insert(
            storage_key,
            CacheSlot {
                response,
                resource_type,
                created_at: now,
                ttl,
                last_touched: now,
            },
        );
    }

    /// Evict the least-recently-touched entry; false when the cache is empty
    fn evict_lru(&self) -> bool {
        let victim = self
            .entries
            .iter()
            .min_by_key(|slot| slot.last_touched)
            .map(|slot| slot.key().clone());

        match victim {
            Some(key) => {
                if self.entries.remove(&key).is_some() {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %key, "Evicted least-recently-used entry");
                }
                true
            }
            None => false,
        }
    }

    /// Remove entries whose storage key contains `pattern`, or everything
    /// when no pattern is given. Returns how many entries were dropped.
    pub fn clear(&self, pattern: Option<&str>) -> usize {
        let before = self.entries.len();
        match pattern {
            Some(pattern) => {
                self.entries.retain(|key, _| !key.contains(pattern));
            }
            None => self.entries.clear(),
        }
        let removed = before - self.entries.len();
        info!(removed = removed, pattern = pattern.unwrap_or("*"), "Cache cleared");
        removed
    }

    /// Drop all expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, slot| !slot.is_expired(now));
        let removed = before - self.entries.len();
        if removed > 0 {
            self.expirations.fetch_add(removed as u64, Ordering::Relaxed);
            debug!(removed = removed, "Purged expired entries");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of live entries of a given resource type
    pub fn count_by_type(&self, resource_type: ResourceType) -> usize {
        self.entries
            .iter()
            .filter(|slot| slot.resource_type == resource_type)
            .count()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            max_entries: self.config.max_entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(url: &str) -> CacheKey {
        CacheKey::new("GET", url, &[])
    }

    fn response(body: &'static str) -> CachedResponse {
        CachedResponse {
            status: 200,
            headers: vec![("content-type".to_string(), "text/css".to_string())],
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let cache = ResponseCache::with_defaults();
        let k = key("https://x.test/a.css");

        assert!(cache.get(&k).is_none());
        cache.insert(&k, response("body { }"), ResourceType::Css);
        let hit = cache.get(&k).expect("should hit");
        assert_eq!(hit.body, Bytes::from_static(b"body { }"));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry_removes_entry() {
        let cache = ResponseCache::with_defaults();
        let k = key("https://x.test/a.css");
        cache.insert(&k, response("payload"), ResourceType::Css);

        // Just before the 24h css TTL: still a hit
        tokio::time::advance(ResourceType::Css.ttl() - Duration::from_secs(1)).await;
        assert!(cache.get(&k).is_some());

        // The hit refreshed recency but not the TTL clock
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get(&k).is_none());
        assert_eq!(cache.len(), 0, "expired entry must be physically removed");
        assert_eq!(cache.stats().expirations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lru_eviction_on_overflow() {
        let cache = ResponseCache::new(CacheConfig { max_entries: 3 });
        let keys: Vec<CacheKey> = (0..4)
            .map(|i| key(&format!("https://x.test/{i}.css")))
            .collect();

        for k in keys.iter().take(3) {
            cache.insert(k, response("x"), ResourceType::Css);
            tokio::time::advance(Duration::from_millis(10)).await;
        }

        // Touch entry 0 so entry 1 becomes the least recently used
        assert!(cache.get(&keys[0]).is_some());
        tokio::time::advance(Duration::from_millis(10)).await;

        cache.insert(&keys[3], response("x"), ResourceType::Css);

        assert!(cache.get(&keys[0]).is_some());
        assert!(cache.get(&keys[1]).is_none(), "LRU entry should be gone");
        assert!(cache.get(&keys[2]).is_some());
        assert!(cache.get(&keys[3]).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_update_does_not_evict() {
        let cache = ResponseCache::new(CacheConfig { max_entries: 2 });
        let a = key("https://x.test/a.css");
        let b = key("https://x.test/b.css");
        cache.insert(&a, response("1"), ResourceType::Css);
        cache.insert(&b, response("2"), ResourceType::Css);

        // Overwriting an existing key must not push anything out
        cache.insert(&a, response("3"), ResourceType::Css);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(
            cache.get(&a).unwrap().body,
            Bytes::from_static(b"3")
        );
    }

    #[tokio::test]
    async fn test_clear_with_pattern() {
        let cache = ResponseCache::with_defaults();
        cache.insert(&key("https://x.test/a.css"), response("1"), ResourceType::Css);
        cache.insert(&key("https://x.test/b.css"), response("2"), ResourceType::Css);
        cache.insert(&key("https://other.test/c.css"), response("3"), ResourceType::Css);

        let removed = cache.clear(Some("x.test"));
        assert_eq!(removed, 2);
        assert_eq!(cache.len(), 1);

        let removed = cache.clear(None);
        assert_eq!(removed, 1);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = ResponseCache::with_defaults();
        cache.insert(&key("https://x.test/data.json"), response("{}"), ResourceType::Api);
        cache.insert(&key("https://x.test/a.css"), response("x"), ResourceType::Css);

        // API TTL is 60s; css survives
        tokio::time::advance(Duration::from_secs(120)).await;
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }
}
