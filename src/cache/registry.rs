//! Entity → key invalidation index.
//!
//! Tracks which cache keys belong to which entity family so a mutation can
//! drop the whole family without scanning or matching substrings.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use super::keys::{CacheKey, EntityKind};
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::registry";

pub struct CacheRegistry {
    entity_to_keys: RwLock<HashMap<EntityKind, HashSet<CacheKey>>>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self {
            entity_to_keys: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, cache_key: &CacheKey) {
        rw_write(&self.entity_to_keys, SOURCE, "register")
            .entry(cache_key.entity())
            .or_default()
            .insert(cache_key.clone());
    }

    /// All keys currently tracked for an entity family.
    pub fn keys_for_entity(&self, entity: EntityKind) -> HashSet<CacheKey> {
        rw_read(&self.entity_to_keys, SOURCE, "keys_for_entity")
            .get(&entity)
            .cloned()
            .unwrap_or_default()
    }

    /// Keys of an entity family restricted to one scope id.
    pub fn keys_for_scope(&self, entity: EntityKind, scope: &str) -> HashSet<CacheKey> {
        rw_read(&self.entity_to_keys, SOURCE, "keys_for_scope")
            .get(&entity)
            .map(|keys| {
                keys.iter()
                    .filter(|key| key.scope() == scope)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn unregister(&self, cache_key: &CacheKey) {
        let mut e2k = rw_write(&self.entity_to_keys, SOURCE, "unregister");
        if let Some(keys) = e2k.get_mut(&cache_key.entity()) {
            keys.remove(cache_key);
            if keys.is_empty() {
                e2k.remove(&cache_key.entity());
            }
        }
    }

    /// Remove all mappings for an entity and return the affected keys.
    pub fn unregister_entity(&self, entity: EntityKind) -> HashSet<CacheKey> {
        rw_write(&self.entity_to_keys, SOURCE, "unregister_entity")
            .remove(&entity)
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        rw_write(&self.entity_to_keys, SOURCE, "clear").clear();
    }

    pub fn entity_count(&self) -> usize {
        rw_read(&self.entity_to_keys, SOURCE, "entity_count").len()
    }

    pub fn key_count(&self) -> usize {
        rw_read(&self.entity_to_keys, SOURCE, "key_count")
            .values()
            .map(HashSet::len)
            .sum()
    }
}

impl Default for CacheRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_lookup() {
        let registry = CacheRegistry::new();
        let key = CacheKey::new(EntityKind::Applications, "cand-1");

        registry.register(&key);

        assert!(registry.keys_for_entity(EntityKind::Applications).contains(&key));
        assert!(registry.keys_for_entity(EntityKind::Offers).is_empty());
    }

    #[test]
    fn unregister_cleans_up_empty_families() {
        let registry = CacheRegistry::new();
        let key = CacheKey::new(EntityKind::Profile, "u1");

        registry.register(&key);
        assert_eq!(registry.key_count(), 1);
        assert_eq!(registry.entity_count(), 1);

        registry.unregister(&key);
        assert_eq!(registry.key_count(), 0);
        assert_eq!(registry.entity_count(), 0);
    }

    #[test]
    fn scope_lookup_ignores_other_scopes() {
        let registry = CacheRegistry::new();
        let mine = CacheKey::new(EntityKind::Offers, "r1").with_qualifier(true);
        let mine_all = CacheKey::new(EntityKind::Offers, "r1").with_qualifier(false);
        let other = CacheKey::new(EntityKind::Offers, "r10").with_qualifier(true);

        registry.register(&mine);
        registry.register(&mine_all);
        registry.register(&other);

        let scoped = registry.keys_for_scope(EntityKind::Offers, "r1");
        assert_eq!(scoped.len(), 2);
        assert!(!scoped.contains(&other));
    }

    #[test]
    fn unregister_entity_returns_affected_keys() {
        let registry = CacheRegistry::new();
        let key1 = CacheKey::new(EntityKind::Feed, "v1");
        let key2 = CacheKey::new(EntityKind::Feed, "v2");
        let untouched = CacheKey::new(EntityKind::Messages, "a_b");

        registry.register(&key1);
        registry.register(&key2);
        registry.register(&untouched);

        let affected = registry.unregister_entity(EntityKind::Feed);
        assert_eq!(affected.len(), 2);
        assert!(affected.contains(&key1));
        assert!(affected.contains(&key2));
        assert_eq!(registry.key_count(), 1);
    }

    #[test]
    fn clear_removes_all_mappings() {
        let registry = CacheRegistry::new();
        registry.register(&CacheKey::new(EntityKind::Profile, "u1"));
        assert!(registry.key_count() > 0);

        registry.clear();
        assert_eq!(registry.key_count(), 0);
        assert_eq!(registry.entity_count(), 0);
    }
}
