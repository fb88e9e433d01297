//! Bounded, time-limited memoization of provider responses.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use bookwright_core::config::CacheConfig;
pub use bookwright_core::config::EvictionPolicy;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// `hits / (hits + misses)`, 0.0 before the first lookup
    pub hit_rate: f64,
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
    order: u64,
}

struct CacheInner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    // order marker -> key; the first entry is the next eviction victim
    order: BTreeMap<u64, String>,
    next_order: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<V> CacheInner<V> {
    fn stamp(&mut self) -> u64 {
        let order = self.next_order;
        self.next_order += 1;
        order
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.order);
        Some(entry)
    }
}

/// Response cache shared by concurrent gateway calls.
///
/// Entries expire lazily: a read past the TTL is a miss and drops the entry.
/// When full, the entry with the smallest order marker is evicted. Under
/// [`EvictionPolicy::Insertion`] the marker is set on write only; under
/// [`EvictionPolicy::Lru`] reads refresh it as well.
pub struct ResponseCache<V> {
    inner: Mutex<CacheInner<V>>,
    capacity: usize,
    ttl: Duration,
    policy: EvictionPolicy,
}

impl<V: Clone> ResponseCache<V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self::with_policy(capacity, ttl, EvictionPolicy::Insertion)
    }

    pub fn with_policy(capacity: usize, ttl: Duration, policy: EvictionPolicy) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::with_capacity(capacity.min(1024)),
                order: BTreeMap::new(),
                next_order: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            capacity: capacity.max(1),
            ttl,
            policy,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::with_policy(config.capacity, config.ttl(), config.eviction)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Look up a live entry.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let expired = match inner.entries.get(key) {
            None => {
                inner.misses += 1;
                return None;
            }
            Some(entry) => now >= entry.expires_at,
        };

        if expired {
            inner.remove(key);
            inner.misses += 1;
            debug!(key, "Cache entry expired");
            return None;
        }

        inner.hits += 1;
        if self.policy == EvictionPolicy::Lru {
            let fresh = inner.stamp();
            if let Some(entry) = inner.entries.get_mut(key) {
                let stale = std::mem::replace(&mut entry.order, fresh);
                inner.order.remove(&stale);
                inner.order.insert(fresh, key.to_string());
            }
        }
        inner.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Insert with the cache's TTL.
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_with_ttl(key, value, self.ttl);
    }

    /// Insert with an explicit TTL. Overwriting a key counts as a new insertion.
    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let now = Instant::now();
        let mut inner = self.inner.lock();

        inner.remove(&key);
        if inner.entries.len() >= self.capacity {
            Self::purge_locked(&mut inner, now);
        }
        while inner.entries.len() >= self.capacity {
            let victim = match inner.order.first_key_value() {
                Some((_, victim)) => victim.clone(),
                None => break,
            };
            inner.remove(&victim);
            inner.evictions += 1;
            debug!(key = %victim, "Evicted cache entry");
        }

        let order = inner.stamp();
        inner.order.insert(order, key.clone());
        inner.entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: now + ttl,
                order,
            },
        );
    }

    /// Drop one entry.
    pub fn remove(&self, key: &str) -> bool {
        self.inner.lock().remove(key).is_some()
    }

    /// Drop all entries and reset the hit/miss counters.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
        inner.hits = 0;
        inner.misses = 0;
        inner.evictions = 0;
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut inner = self.inner.lock();
        Self::purge_locked(&mut inner, Instant::now())
    }

    fn purge_locked(inner: &mut CacheInner<V>, now: Instant) -> usize {
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| now >= entry.expires_at)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let lookups = inner.hits + inner.misses;
        CacheStats {
            size: inner.entries.len(),
            capacity: self.capacity,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                inner.hits as f64 / lookups as f64
            },
        }
    }
}

/// Inputs that identify a cacheable gateway response.
#[derive(Debug, Clone)]
pub struct CacheKey<'a> {
    pub kind: &'a str,
    pub provider: &'a str,
    pub model: &'a str,
    pub temperature: f32,
    pub max_tokens: u32,
    pub prompt: &'a str,
    /// Schema identity for structured requests
    pub schema: Option<&'a str>,
}

impl CacheKey<'_> {
    /// Render the canonical key.
    ///
    /// Only the first `prompt_chars` characters are kept verbatim; the full
    /// prompt's length and hash are appended so prompts sharing a prefix do
    /// not collide.
    pub fn render(&self, prompt_chars: usize) -> String {
        let head: String = self.prompt.chars().take(prompt_chars).collect();
        let mut hasher = DefaultHasher::new();
        self.prompt.hash(&mut hasher);
        if let Some(schema) = self.schema {
            schema.hash(&mut hasher);
        }

        format!(
            "{}|{}|{}|t={:.3}|m={}|{}|{}|{:016x}|{}",
            self.kind,
            self.provider,
            self.model,
            self.temperature,
            self.max_tokens,
            self.schema.unwrap_or("-"),
            self.prompt.chars().count(),
            hasher.finish(),
            head
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_then_get() {
        let cache = ResponseCache::new(4, Duration::from_secs(60));
        cache.set("k", "v".to_string());
        assert_eq!(cache.get("k"), Some("v".to_string()));
    }

    #[test]
    fn test_entry_expires_after_ttl() {
        let cache = ResponseCache::new(4, Duration::from_millis(20));
        cache.set("k", "v".to_string());
        assert_eq!(cache.get("k").as_deref(), Some("v"));

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_overflow_evicts_earliest_insertion() {
        let cache = ResponseCache::new(3, Duration::from_secs(60));
        cache.set("a", 1);
        cache.set("b", 2);
        cache.set("c", 3);
        // Reading does not protect "a" under insertion order
        assert_eq!(cache.get("a"), Some(1));
        cache.set("d", 4);

        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(2));
        assert_eq!(cache.get("d"), Some(4));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_lru_policy_protects_recent_reads() {
        let cache = ResponseCache::with_policy(3, Duration::from_secs(60), EvictionPolicy::Lru);
        cache.set("a", 1);
        cache.set("b", 2);
        cache.set("c", 3);
        assert_eq!(cache.get("a"), Some(1));
        cache.set("d", 4);

        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(1));
    }

    #[test]
    fn test_overwrite_counts_as_new_insertion() {
        let cache = ResponseCache::new(2, Duration::from_secs(60));
        cache.set("a", 1);
        cache.set("b", 2);
        cache.set("a", 10);
        cache.set("c", 3);

        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(10));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_expired_entries_make_room_before_eviction() {
        let cache = ResponseCache::new(2, Duration::from_secs(60));
        cache.set_with_ttl("short", 1, Duration::from_millis(10));
        cache.set("long", 2);
        std::thread::sleep(Duration::from_millis(30));
        cache.set("new", 3);

        assert_eq!(cache.get("long"), Some(2));
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_hit_rate_and_clear() {
        let cache = ResponseCache::new(4, Duration::from_secs(60));
        assert_eq!(cache.stats().hit_rate, 0.0);

        cache.set("k", 1);
        cache.get("k");
        cache.get("k");
        cache.get("k");
        cache.get("missing");
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (3, 1));
        assert!((stats.hit_rate - 0.75).abs() < f64::EPSILON);

        cache.clear();
        let stats = cache.stats();
        assert_eq!((stats.size, stats.hits, stats.misses), (0, 0, 0));
        assert_eq!(stats.capacity, 4);
    }

    #[test]
    fn test_cache_key_distinguishes_long_prompts() {
        let prefix = "x".repeat(300);
        let key = |prompt: &str| {
            CacheKey {
                kind: "text",
                provider: "openai",
                model: "gpt-4o",
                temperature: 0.7,
                max_tokens: 100,
                prompt,
                schema: None,
            }
            .render(200)
        };

        assert_ne!(key(&format!("{}a", prefix)), key(&format!("{}b", prefix)));
        assert_eq!(key("same"), key("same"));
    }

    #[test]
    fn test_concurrent_access() {
        use std::sync::Arc;

        let cache = Arc::new(ResponseCache::new(64, Duration::from_secs(60)));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let key = format!("{}-{}", t, i % 20);
                        cache.set(key.clone(), i);
                        cache.get(&key);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(cache.len() <= 64);
    }
}
