//! # Caching Layer - bounded TTL + LRU caches for external action results

use crate::providers::{BlogAnalysis, HashtagResearch, InstagramProfileAnalysis, Recency, SearchResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

/// Composite cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(pub String);

impl CacheKey {
    /// Key for a web search. Queries differing only in case or whitespace
    /// share a key; domain order does not matter.
    pub fn search(
        query: &str,
        recency: Option<Recency>,
        domains: &[String],
        system_context: Option<&str>,
    ) -> Self {
        let query = query.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        let mut domains: Vec<String> = domains.iter().map(|d| d.trim().to_lowercase()).collect();
        domains.sort();
        domains.dedup();
        let recency = recency.map(|r| r.to_string()).unwrap_or_else(|| "any".into());
        let context = system_context.map(context_hash).unwrap_or_default();
        Self(format!("search:{query}|{recency}|{}|{context}", domains.join(",")))
    }

    pub fn profile(username: &str) -> Self {
        Self(format!("profile:{}", crate::profile::normalize_handle(username)))
    }

    pub fn hashtag(tag: &str) -> Self {
        Self(format!("hashtag:{}", tag.trim().trim_start_matches('#').to_lowercase()))
    }

    pub fn blog(domain: &str) -> Self {
        Self(format!("blog:{}", domain.trim().to_lowercase()))
    }
}

fn context_hash(context: &str) -> String {
    let digest = Sha256::digest(context.as_bytes());
    hex::encode(&digest[..8])
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 500,
            ttl: Duration::from_secs(30 * 60),
        }
    }
}

pub const SEARCH_TTL_MIN: Duration = Duration::from_secs(2 * 60);
pub const SEARCH_TTL_MAX: Duration = Duration::from_secs(30 * 60);

impl CacheConfig {
    /// Search results go stale quickly; the TTL is clamped to 2..=30 minutes
    pub fn search(ttl: Duration) -> Self {
        Self {
            max_entries: 500,
            ttl: ttl.clamp(SEARCH_TTL_MIN, SEARCH_TTL_MAX),
        }
    }

    pub fn profile_analysis() -> Self {
        Self {
            max_entries: 200,
            ttl: Duration::from_secs(24 * 3600),
        }
    }

    pub fn hashtag_search() -> Self {
        Self {
            max_entries: 200,
            ttl: Duration::from_secs(6 * 3600),
        }
    }

    pub fn blog_analysis() -> Self {
        Self {
            max_entries: 100,
            ttl: Duration::from_secs(24 * 3600),
        }
    }
}

/// A cached payload with the citations it was served with
#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue<V> {
    pub payload: V,
    pub citations: Vec<String>,
}

struct Entry<V> {
    value: CachedValue<V>,
    created_at: Instant,
    last_accessed_at: Instant,
    // Monotonic access order; survives a paused clock
    tick: u64,
}

struct Inner<V> {
    entries: HashMap<CacheKey, Entry<V>>,
    tick: u64,
    stats: CacheStats,
}

/// Bounded cache with lazy TTL expiry and least-recently-accessed eviction
pub struct TtlLruCache<V> {
    name: &'static str,
    config: CacheConfig,
    inner: RwLock<Inner<V>>,
}

impl<V: Clone + Send + Sync> TtlLruCache<V> {
    pub fn new(name: &'static str, config: CacheConfig) -> Self {
        Self {
            name,
            config,
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                tick: 0,
                stats: CacheStats::default(),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub async fn get(&self, key: &CacheKey) -> Option<CachedValue<V>> {
        let mut inner = self.inner.write().await;
        let now = Instant::now();
        let expired = match inner.entries.get(key) {
            None => {
                inner.stats.misses += 1;
                return None;
            }
            Some(entry) => now.duration_since(entry.created_at) >= self.config.ttl,
        };
        if expired {
            inner.entries.remove(key);
            inner.stats.expirations += 1;
            inner.stats.misses += 1;
            debug!(cache = self.name, key = %key.0, "cache entry expired");
            return None;
        }

        inner.tick += 1;
        let tick = inner.tick;
        inner.stats.hits += 1;
        let entry = inner.entries.get_mut(key)?;
        entry.last_accessed_at = now;
        entry.tick = tick;
        debug!(cache = self.name, key = %key.0, "cache hit");
        Some(entry.value.clone())
    }

    pub async fn set(&self, key: CacheKey, payload: V, citations: Vec<String>) {
        let mut inner = self.inner.write().await;
        if self.config.max_entries == 0 {
            return;
        }
        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.config.max_entries {
            let lru = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.tick)
                .map(|(k, _)| k.clone());
            if let Some(lru) = lru {
                inner.entries.remove(&lru);
                inner.stats.evictions += 1;
                debug!(cache = self.name, key = %lru.0, "evicted least recently used entry");
            }
        }
        inner.tick += 1;
        let now = Instant::now();
        let entry = Entry {
            value: CachedValue { payload, citations },
            created_at: now,
            last_accessed_at: now,
            tick: inner.tick,
        };
        inner.entries.insert(key, entry);
    }

    pub async fn invalidate(&self, key: &CacheKey) -> bool {
        self.inner.write().await.entries.remove(key).is_some()
    }

    pub async fn clear(&self) {
        self.inner.write().await.entries.clear();
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Time since the entry was last read or written, if present
    pub async fn idle_for(&self, key: &CacheKey) -> Option<Duration> {
        let inner = self.inner.read().await;
        inner.entries.get(key).map(|e| e.last_accessed_at.elapsed())
    }

    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.read().await;
        CacheStats {
            entries: inner.entries.len(),
            ..inner.stats.clone()
        }
    }
}

/// Per-action cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionCacheConfig {
    pub search: CacheConfig,
    pub profile: CacheConfig,
    pub hashtag: CacheConfig,
    pub blog: CacheConfig,
}

impl Default for ActionCacheConfig {
    fn default() -> Self {
        Self {
            search: CacheConfig::search(Duration::from_secs(10 * 60)),
            profile: CacheConfig::profile_analysis(),
            hashtag: CacheConfig::hashtag_search(),
            blog: CacheConfig::blog_analysis(),
        }
    }
}

/// One cache per external action type, injected into the router
pub struct ActionCaches {
    pub search: TtlLruCache<SearchResult>,
    pub profile: TtlLruCache<InstagramProfileAnalysis>,
    pub hashtag: TtlLruCache<HashtagResearch>,
    pub blog: TtlLruCache<BlogAnalysis>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionCacheStats {
    pub search: CacheStats,
    pub profile: CacheStats,
    pub hashtag: CacheStats,
    pub blog: CacheStats,
}

impl ActionCaches {
    pub fn new(config: &ActionCacheConfig) -> Self {
        Self {
            search: TtlLruCache::new("web_search", config.search.clone()),
            profile: TtlLruCache::new("instagram_analysis", config.profile.clone()),
            hashtag: TtlLruCache::new("hashtag_search", config.hashtag.clone()),
            blog: TtlLruCache::new("blog_analysis", config.blog.clone()),
        }
    }

    pub async fn stats(&self) -> ActionCacheStats {
        ActionCacheStats {
            search: self.search.stats().await,
            profile: self.profile.stats().await,
            hashtag: self.hashtag.stats().await,
            blog: self.blog.stats().await,
        }
    }

    pub async fn clear(&self) {
        self.search.clear().await;
        self.profile.clear().await;
        self.hashtag.clear().await;
        self.blog.clear().await;
    }
}

impl Default for ActionCaches {
    fn default() -> Self {
        Self::new(&ActionCacheConfig::default())
    }
}

/// Configuration builder
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    config: CacheConfig,
}

impl CacheConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_entries(mut self, count: usize) -> Self {
        self.config.max_entries = count;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.config.ttl = ttl;
        self
    }

    pub fn build(self) -> CacheConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small(max_entries: usize, ttl_secs: u64) -> TtlLruCache<String> {
        TtlLruCache::new(
            "test",
            CacheConfigBuilder::new()
                .max_entries(max_entries)
                .ttl(Duration::from_secs(ttl_secs))
                .build(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_before_expiry_miss_after() {
        let cache = small(10, 60);
        let key = CacheKey::hashtag("#Vegan");
        cache.set(key.clone(), "posts".into(), vec!["https://a".into()]).await;

        tokio::time::advance(Duration::from_secs(59)).await;
        let hit = cache.get(&key).await.unwrap();
        assert_eq!(hit.payload, "posts");
        assert_eq!(hit.citations, vec!["https://a".to_string()]);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get(&key).await.is_none());
        assert_eq!(cache.len().await, 0);

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.expirations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_does_not_extend_ttl() {
        let cache = small(10, 60);
        let key = CacheKey::blog("later.com");
        cache.set(key.clone(), "x".into(), vec![]).await;
        tokio::time::advance(Duration::from_secs(40)).await;
        assert!(cache.get(&key).await.is_some());
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_eviction_removes_exactly_least_recently_accessed() {
        let cache = small(3, 600);
        let a = CacheKey::hashtag("a");
        let b = CacheKey::hashtag("b");
        let c = CacheKey::hashtag("c");
        cache.set(a.clone(), "a".into(), vec![]).await;
        cache.set(b.clone(), "b".into(), vec![]).await;
        cache.set(c.clone(), "c".into(), vec![]).await;

        // touch a, leaving b as the oldest access
        assert!(cache.get(&a).await.is_some());

        let d = CacheKey::hashtag("d");
        cache.set(d.clone(), "d".into(), vec![]).await;

        assert_eq!(cache.len().await, 3);
        assert!(cache.get(&b).await.is_none());
        assert!(cache.get(&a).await.is_some());
        assert!(cache.get(&c).await.is_some());
        assert!(cache.get(&d).await.is_some());
        assert_eq!(cache.stats().await.evictions, 1);
    }

    #[tokio::test]
    async fn test_overwrite_at_capacity_does_not_evict() {
        let cache = small(2, 600);
        cache.set(CacheKey::hashtag("a"), "1".into(), vec![]).await;
        cache.set(CacheKey::hashtag("b"), "1".into(), vec![]).await;
        cache.set(CacheKey::hashtag("a"), "2".into(), vec![]).await;
        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.stats().await.evictions, 0);
        assert_eq!(cache.get(&CacheKey::hashtag("a")).await.unwrap().payload, "2");
    }

    #[test]
    fn test_search_key_normalization() {
        let a = CacheKey::search(
            "  Best   Reels TIPS ",
            Some(Recency::Week),
            &["b.com".into(), "A.com".into()],
            Some("persona"),
        );
        let b = CacheKey::search("best reels tips", Some(Recency::Week), &["a.com".into(), "b.com".into()], Some("persona"));
        assert_eq!(a, b);

        let other_context = CacheKey::search("best reels tips", Some(Recency::Week), &["a.com".into(), "b.com".into()], Some("other"));
        assert_ne!(a, other_context);
        let other_recency = CacheKey::search("best reels tips", Some(Recency::Day), &["a.com".into(), "b.com".into()], Some("persona"));
        assert_ne!(a, other_recency);
    }

    #[test]
    fn test_search_ttl_is_clamped() {
        assert_eq!(CacheConfig::search(Duration::from_secs(10)).ttl, SEARCH_TTL_MIN);
        assert_eq!(CacheConfig::search(Duration::from_secs(3600)).ttl, SEARCH_TTL_MAX);
        assert_eq!(ActionCacheConfig::default().search.ttl, Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_invalidate_and_clear() {
        let caches = ActionCaches::default();
        let key = CacheKey::profile("@BrandX");
        assert_eq!(key, CacheKey::profile("brandx"));
        caches.profile.set(key.clone(), InstagramProfileAnalysis::default(), vec![]).await;
        assert!(caches.profile.invalidate(&key).await);
        assert!(!caches.profile.invalidate(&key).await);

        caches.hashtag.set(CacheKey::hashtag("x"), HashtagResearch::default(), vec![]).await;
        caches.clear().await;
        assert_eq!(caches.stats().await.hashtag.entries, 0);
    }
}
