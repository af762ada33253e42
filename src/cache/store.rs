//! TTL cache storage.
//!
//! Entries expire lazily: a read of an entry whose age reached its TTL is a
//! miss and drops the entry. Nothing sweeps in the background. The store is
//! additionally capacity-bounded with LRU eviction.
//!
//! The entity index is only touched while the entries write lock is held, so
//! every live entry is always reachable through `invalidate_entity`.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use lru::LruCache;
use metrics::counter;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, trace};

use crate::clock::{Clock, SystemClock};

use super::config::CacheConfig;
use super::keys::{CacheKey, EntityKind};
use super::lock::{rw_read, rw_write};
use super::registry::CacheRegistry;

const SOURCE: &str = "cache::store";

pub(crate) const METRIC_CACHE_HIT: &str = "talentgrid_cache_hit_total";
pub(crate) const METRIC_CACHE_MISS: &str = "talentgrid_cache_miss_total";
pub(crate) const METRIC_CACHE_EVICT: &str = "talentgrid_cache_evict_total";
pub(crate) const METRIC_CACHE_INVALIDATED: &str = "talentgrid_cache_invalidated_total";

/// Type-erased value shared by every query façade.
pub type CachedValue = Arc<dyn Any + Send + Sync>;

/// The application-wide query cache.
pub type QueryCache = TtlCache<CachedValue>;

struct Entry<V> {
    value: V,
    stored_at: OffsetDateTime,
    ttl: Duration,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: OffsetDateTime) -> bool {
        let age = now - self.stored_at;
        age.whole_milliseconds() >= self.ttl.as_millis() as i128
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

pub struct TtlCache<V> {
    entries: RwLock<LruCache<CacheKey, Entry<V>>>,
    registry: CacheRegistry,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(config.max_entries_non_zero())),
            registry: CacheRegistry::new(),
            default_ttl: config.default_ttl,
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Returns the value if present and unexpired. Never fails.
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let now = self.clock.now();
        let mut entries = rw_write(&self.entries, SOURCE, "get");

        let (value, expired) = match entries.get(key) {
            Some(entry) if entry.is_expired(now) => (None, true),
            Some(entry) => (Some(entry.value.clone()), false),
            None => (None, false),
        };
        if expired {
            entries.pop(key);
            self.registry.unregister(key);
        }
        drop(entries);

        if let Some(value) = value {
            self.hits.fetch_add(1, Ordering::Relaxed);
            counter!(METRIC_CACHE_HIT).increment(1);
            trace!(key = %key, "Cache hit");
            return Some(value);
        }

        if expired {
            trace!(key = %key, "Cache entry expired");
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_CACHE_MISS).increment(1);
        trace!(key = %key, "Cache miss");
        None
    }

    /// Store with the default TTL.
    pub fn set(&self, key: CacheKey, value: V) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    /// Unconditional overwrite; the expiry clock restarts.
    pub fn set_with_ttl(&self, key: CacheKey, value: V, ttl: Duration) {
        let entry = Entry {
            value,
            stored_at: self.clock.now(),
            ttl,
        };

        let mut entries = rw_write(&self.entries, SOURCE, "set");
        self.registry.register(&key);
        let evicted = entries
            .push(key.clone(), entry)
            .map(|(evicted_key, _)| evicted_key)
            .filter(|evicted_key| *evicted_key != key);
        if let Some(evicted_key) = evicted.as_ref() {
            self.registry.unregister(evicted_key);
        }
        drop(entries);

        if let Some(evicted_key) = evicted {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            counter!(METRIC_CACHE_EVICT).increment(1);
            debug!(key = %evicted_key, "Cache entry evicted for capacity");
        }
    }

    /// Remove one entry, or every entry when `key` is `None`.
    pub fn clear(&self, key: Option<&CacheKey>) {
        match key {
            Some(key) => {
                let mut entries = rw_write(&self.entries, SOURCE, "clear_one");
                entries.pop(key);
                self.registry.unregister(key);
            }
            None => {
                let mut entries = rw_write(&self.entries, SOURCE, "clear_all");
                entries.clear();
                self.registry.clear();
            }
        }
    }

    /// Remove every key whose rendered form contains `pattern`.
    pub fn invalidate_pattern(&self, pattern: &str) -> usize {
        let mut entries = rw_write(&self.entries, SOURCE, "invalidate_pattern");
        let matched: Vec<CacheKey> = entries
            .iter()
            .filter(|(key, _)| key.render().contains(pattern))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &matched {
            entries.pop(key);
            self.registry.unregister(key);
        }
        drop(entries);

        self.record_invalidation("pattern", pattern, matched.len())
    }

    /// Remove every key owned by an entity family.
    pub fn invalidate_entity(&self, entity: EntityKind) -> usize {
        let mut entries = rw_write(&self.entries, SOURCE, "invalidate_entity");
        let removed = self
            .registry
            .unregister_entity(entity)
            .iter()
            .filter(|key| entries.pop(*key).is_some())
            .count();
        drop(entries);

        self.record_invalidation("entity", entity.as_str(), removed)
    }

    /// Remove the keys of an entity family that share one scope id.
    pub fn invalidate_scope(&self, entity: EntityKind, scope: &str) -> usize {
        let mut entries = rw_write(&self.entries, SOURCE, "invalidate_scope");
        let keys = self.registry.keys_for_scope(entity, scope);
        let mut removed = 0;
        for key in &keys {
            if entries.pop(key).is_some() {
                removed += 1;
            }
            self.registry.unregister(key);
        }
        drop(entries);

        self.record_invalidation("scope", scope, removed)
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn record_invalidation(&self, mode: &'static str, target: &str, removed: usize) -> usize {
        counter!(METRIC_CACHE_INVALIDATED, "mode" => mode).increment(removed as u64);
        debug!(mode, target, removed, "Cache invalidated");
        removed
    }
}

impl TtlCache<CachedValue> {
    /// Typed read of a type-erased entry. A value of another type is a miss.
    pub fn get_as<T: Any + Send + Sync>(&self, key: &CacheKey) -> Option<Arc<T>> {
        self.get(key).and_then(|value| value.downcast::<T>().ok())
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use time::macros::datetime;

    use super::*;
    use crate::clock::ManualClock;

    fn cache_with_clock() -> (TtlCache<u32>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(datetime!(2025-06-01 09:00 UTC)));
        let cache = TtlCache::with_clock(&CacheConfig::default(), clock.clone());
        (cache, clock)
    }

    fn key(entity: EntityKind, scope: &str) -> CacheKey {
        CacheKey::new(entity, scope)
    }

    #[test]
    fn get_after_set_returns_value() {
        let (cache, _) = cache_with_clock();
        cache.set(key(EntityKind::Profile, "u1"), 7);
        assert_eq!(cache.get(&key(EntityKind::Profile, "u1")), Some(7));
    }

    #[test]
    fn entry_expires_once_ttl_elapses() {
        let (cache, clock) = cache_with_clock();
        let k = key(EntityKind::Offers, "r1");
        cache.set_with_ttl(k.clone(), 1, Duration::from_secs(180));

        clock.advance(Duration::from_secs(179));
        assert_eq!(cache.get(&k), Some(1));

        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.get(&k), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn set_restarts_expiry_clock() {
        let (cache, clock) = cache_with_clock();
        let k = key(EntityKind::Feed, "v");
        cache.set_with_ttl(k.clone(), 1, Duration::from_secs(60));

        clock.advance(Duration::from_secs(50));
        cache.set_with_ttl(k.clone(), 2, Duration::from_secs(60));
        clock.advance(Duration::from_secs(50));

        assert_eq!(cache.get(&k), Some(2));
    }

    #[test]
    fn missing_key_is_absent_not_error() {
        let (cache, _) = cache_with_clock();
        assert_eq!(cache.get(&key(EntityKind::Messages, "nobody")), None);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn clear_removes_one_or_all() {
        let (cache, _) = cache_with_clock();
        cache.set(key(EntityKind::Profile, "a"), 1);
        cache.set(key(EntityKind::Profile, "b"), 2);

        cache.clear(Some(&key(EntityKind::Profile, "a")));
        assert_eq!(cache.get(&key(EntityKind::Profile, "a")), None);
        assert_eq!(cache.get(&key(EntityKind::Profile, "b")), Some(2));

        cache.clear(None);
        assert!(cache.is_empty());
    }

    #[test]
    fn invalidate_pattern_removes_matching_keys_only() {
        let (cache, _) = cache_with_clock();
        cache.set(key(EntityKind::Applications, "c1"), 1);
        cache.set(key(EntityKind::Applications, "c2").with_qualifier("pending"), 2);
        cache.set(key(EntityKind::Offers, "r1"), 3);

        let removed = cache.invalidate_pattern("applications_");

        assert_eq!(removed, 2);
        assert_eq!(cache.get(&key(EntityKind::Applications, "c1")), None);
        assert_eq!(cache.get(&key(EntityKind::Offers, "r1")), Some(3));
    }

    #[test]
    fn invalidate_entity_does_not_cross_families() {
        let (cache, _) = cache_with_clock();
        // "profile_offers" contains "offers" as a substring but belongs to profiles.
        cache.set(key(EntityKind::Profile, "offers"), 1);
        cache.set(key(EntityKind::Offers, "r1"), 2);

        assert_eq!(cache.invalidate_entity(EntityKind::Offers), 1);
        assert_eq!(cache.get(&key(EntityKind::Profile, "offers")), Some(1));
    }

    #[test]
    fn invalidate_scope_keeps_other_scopes() {
        let (cache, _) = cache_with_clock();
        cache.set(key(EntityKind::Offers, "r1").with_qualifier(true), 1);
        cache.set(key(EntityKind::Offers, "r1").with_qualifier(false), 2);
        cache.set(key(EntityKind::Offers, "r2").with_qualifier(true), 3);

        assert_eq!(cache.invalidate_scope(EntityKind::Offers, "r1"), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn capacity_bound_evicts_least_recently_used() {
        let clock = Arc::new(ManualClock::new(datetime!(2025-06-01 09:00 UTC)));
        let config = CacheConfig {
            max_entries: 2,
            ..Default::default()
        };
        let cache: TtlCache<u32> = TtlCache::with_clock(&config, clock);

        cache.set(key(EntityKind::Feed, "1"), 1);
        cache.set(key(EntityKind::Feed, "2"), 2);
        let _ = cache.get(&key(EntityKind::Feed, "1"));
        cache.set(key(EntityKind::Feed, "3"), 3);

        assert_eq!(cache.get(&key(EntityKind::Feed, "2")), None);
        assert_eq!(cache.get(&key(EntityKind::Feed, "1")), Some(1));
        assert_eq!(cache.stats().evictions, 1);
        // Overwriting an existing key is not an eviction.
        cache.set(key(EntityKind::Feed, "3"), 4);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn typed_reads_of_shared_values() {
        let cache = QueryCache::new(&CacheConfig::default());
        let k = key(EntityKind::Feed, "v");
        cache.set(k.clone(), Arc::new(vec![1_u8, 2, 3]));

        assert_eq!(cache.get_as::<Vec<u8>>(&k).as_deref(), Some(&vec![1, 2, 3]));
        assert!(cache.get_as::<String>(&k).is_none());
    }

    #[test]
    fn hit_rate_counts_hits_and_misses() {
        let (cache, _) = cache_with_clock();
        let k = key(EntityKind::Profile, "u");
        let _ = cache.get(&k);
        cache.set(k.clone(), 1);
        let _ = cache.get(&k);
        let _ = cache.get(&k);

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 2.0 / 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn entity_index_tracks_entries_under_concurrent_expiry() {
        use std::sync::atomic::AtomicBool;
        use std::thread;

        let (cache, _) = cache_with_clock();
        let keys: Vec<CacheKey> = (0..4).map(|i| key(EntityKind::Feed, &i.to_string())).collect();
        let writing = AtomicBool::new(true);

        thread::scope(|scope| {
            for k in &keys {
                let (cache, writing) = (&cache, &writing);
                scope.spawn(move || {
                    while writing.load(Ordering::Relaxed) {
                        let _ = cache.get(k);
                    }
                });
            }
            let writers: Vec<_> = keys
                .iter()
                .map(|k| {
                    let cache = &cache;
                    scope.spawn(move || {
                        for round in 0..2_000 {
                            cache.set_with_ttl(k.clone(), round, Duration::ZERO);
                            cache.set(k.clone(), round);
                        }
                    })
                })
                .collect();
            for writer in writers {
                writer.join().expect("writer");
            }
            writing.store(false, Ordering::Relaxed);
        });

        assert_eq!(cache.len(), keys.len());
        assert_eq!(cache.registry.key_count(), keys.len());
        assert_eq!(cache.invalidate_entity(EntityKind::Feed), keys.len());
        assert!(cache.is_empty());
    }

    #[test]
    fn recovers_from_poisoned_lock() {
        let (cache, _) = cache_with_clock();
        cache.set(key(EntityKind::Profile, "u"), 9);

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = cache.entries.write().expect("lock");
            panic!("poison");
        }));

        assert_eq!(cache.get(&key(EntityKind::Profile, "u")), Some(9));
    }
}
