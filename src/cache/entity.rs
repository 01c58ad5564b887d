//! Write-through LRU cache in front of an entity store.

// Hit-rate math on counters is fine at f64 precision.
#![allow(clippy::cast_precision_loss)]

use super::TtlLruCache;
use crate::models::{
    Entity, EntityId, EntityQuery, EntityType, EntityVersion, Fact, MemorySummary, Plotline,
    PlotlineStatus, PlotlineUpdate, Relation, RelationType,
};
use crate::storage::EntityStore;
use crate::storage::sqlite::acquire_lock;
use crate::Result;
use lru::LruCache;
use serde::Serialize;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::instrument;

/// Per-id access counters kept for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AccessCount {
    /// Reads served from the cache.
    pub hits: u64,
    /// Reads that fell through to the store.
    pub misses: u64,
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Reads served from the cache.
    pub hits: u64,
    /// Reads that fell through to the store.
    pub misses: u64,
    /// Entries evicted for capacity.
    pub evictions: u64,
    /// Entries currently cached.
    pub size: usize,
    /// Maximum entries.
    pub capacity: usize,
}

impl CacheStats {
    /// `hits / (hits + misses)`, or 0 with no traffic.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Bounded, write-through LRU cache implementing [`EntityStore`] over another store.
///
/// - `store` writes to the inner store first and refreshes the cache entry
///   in the same call, so there is no dirty window
/// - `retrieve` serves hits immediately; misses load from the inner store and
///   insert, evicting the least recently used entry when full
/// - `delete` and tombstoning evict the entry
///
/// Every change to the cached set bumps a generation counter under the
/// entries lock. A miss only inserts what it loaded if the generation is
/// unchanged since the lookup, so a read racing a delete cannot put the
/// deleted entity back.
///
/// Writes made directly against the inner store (or by another process)
/// are not observed; such staleness lasts until the entry expires or is
/// evicted.
///
/// The cache is an owned value: capacity and TTL are fixed at construction.
pub struct CacheLayer {
    inner: Arc<dyn EntityStore>,
    entries: Mutex<TtlLruCache<EntityId, Entity>>,
    access: Mutex<LruCache<EntityId, AccessCount>>,
    generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheLayer {
    /// Wraps `inner` with a cache of `capacity` entries and optional TTL.
    #[must_use]
    pub fn new(inner: Arc<dyn EntityStore>, capacity: usize, ttl: Option<Duration>) -> Self {
        // Diagnostics track more ids than the cache holds so evicted ids keep their history.
        let access_cap = NonZeroUsize::new(capacity.saturating_mul(4)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            entries: Mutex::new(TtlLruCache::new(capacity, ttl)),
            access: Mutex::new(LruCache::new(access_cap)),
            generation: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns the wrapped store.
    #[must_use]
    pub fn inner(&self) -> &Arc<dyn EntityStore> {
        &self.inner
    }

    /// Returns current statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let entries = acquire_lock(&self.entries);
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: entries.evictions(),
            size: entries.len(),
            capacity: entries.capacity(),
        }
    }

    /// Returns the hit/miss counts for one id, if it has been read recently.
    #[must_use]
    pub fn access_count(&self, id: &EntityId) -> Option<AccessCount> {
        acquire_lock(&self.access).peek(id).copied()
    }

    /// Returns true if `id` is cached, without affecting recency.
    #[must_use]
    pub fn contains(&self, id: &EntityId) -> bool {
        acquire_lock(&self.entries).peek(id).is_some()
    }

    /// Drops one cached entry.
    pub fn invalidate(&self, id: &EntityId) {
        let mut entries = acquire_lock(&self.entries);
        self.generation.fetch_add(1, Ordering::Relaxed);
        entries.pop(id);
    }

    /// Drops every cached entry. Counters are kept.
    pub fn clear(&self) {
        let mut entries = acquire_lock(&self.entries);
        self.generation.fetch_add(1, Ordering::Relaxed);
        entries.clear();
    }

    fn cache_put(&self, entity: &Entity) {
        let mut entries = acquire_lock(&self.entries);
        self.generation.fetch_add(1, Ordering::Relaxed);
        let evicted = entries.put(entity.id.clone(), entity.clone());
        drop(entries);
        Self::note_eviction(evicted);
    }

    /// Inserts a value loaded on a miss, unless the cached set changed since
    /// `seen` was read. Returns whether it was inserted.
    fn fill(&self, entity: &Entity, seen: u64) -> bool {
        let mut entries = acquire_lock(&self.entries);
        if self.generation.load(Ordering::Relaxed) != seen {
            tracing::trace!(entity_id = %entity.id, "Skipped stale cache fill");
            return false;
        }
        let evicted = entries.put(entity.id.clone(), entity.clone());
        drop(entries);
        Self::note_eviction(evicted);
        true
    }

    fn note_eviction(evicted: Option<EntityId>) {
        if let Some(evicted) = evicted {
            tracing::trace!(entity_id = %evicted, "Evicted from entity cache");
            metrics::counter!("cache_evictions_total", "cache" => "entity").increment(1);
        }
    }

    fn record_access(&self, id: &EntityId, hit: bool) {
        let counter = if hit { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        if hit {
            metrics::counter!("cache_hits_total", "cache" => "entity").increment(1);
        } else {
            metrics::counter!("cache_misses_total", "cache" => "entity").increment(1);
        }

        let mut access = acquire_lock(&self.access);
        let mut count = access.get(id).copied().unwrap_or_default();
        if hit {
            count.hits += 1;
        } else {
            count.misses += 1;
        }
        access.put(id.clone(), count);
    }
}

impl EntityStore for CacheLayer {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    #[instrument(skip(self, entity), fields(operation = "cache_store", entity_id = %entity.id))]
    fn store(&self, entity: &Entity) -> Result<EntityId> {
        let id = self.inner.store(entity)?;
        self.cache_put(entity);
        Ok(id)
    }

    #[instrument(skip(self), fields(operation = "cache_retrieve", entity_id = %id))]
    fn retrieve(&self, id: &EntityId) -> Result<Option<Entity>> {
        let (cached, seen) = {
            let mut entries = acquire_lock(&self.entries);
            let cached = entries.get(id).cloned();
            (cached, self.generation.load(Ordering::Relaxed))
        };
        if let Some(entity) = cached {
            self.record_access(id, true);
            return Ok(Some(entity));
        }

        self.record_access(id, false);
        let loaded = self.inner.retrieve(id)?;
        if let Some(ref entity) = loaded {
            self.fill(entity, seen);
        }
        Ok(loaded)
    }

    fn query(&self, query: &EntityQuery) -> Result<Vec<Entity>> {
        self.inner.query(query)
    }

    fn delete(&self, id: &EntityId) -> Result<bool> {
        let removed = self.inner.delete(id)?;
        self.invalidate(id);
        acquire_lock(&self.access).pop(id);
        Ok(removed)
    }

    fn set_active(&self, id: &EntityId, active: bool) -> Result<bool> {
        let changed = self.inner.set_active(id, active)?;
        self.invalidate(id);
        Ok(changed)
    }

    fn count_by_type(&self, session_id: Option<&str>) -> Result<HashMap<EntityType, usize>> {
        self.inner.count_by_type(session_id)
    }

    fn add_relation(&self, relation: &Relation) -> Result<()> {
        self.inner.add_relation(relation)
    }

    fn remove_relation(
        &self,
        source_id: &EntityId,
        target_id: &EntityId,
        relation_type: RelationType,
    ) -> Result<bool> {
        self.inner.remove_relation(source_id, target_id, relation_type)
    }

    fn get_related(
        &self,
        id: &EntityId,
        relation_type: Option<RelationType>,
    ) -> Result<Vec<Relation>> {
        self.inner.get_related(id, relation_type)
    }

    fn list_relations(&self, session_id: Option<&str>) -> Result<Vec<Relation>> {
        self.inner.list_relations(session_id)
    }

    fn store_fact(&self, fact: &Fact) -> Result<()> {
        self.inner.store_fact(fact)
    }

    fn get_facts(&self, session_id: &str, limit: usize) -> Result<Vec<Fact>> {
        self.inner.get_facts(session_id, limit)
    }

    fn get_facts_for_entity(&self, id: &EntityId) -> Result<Vec<Fact>> {
        self.inner.get_facts_for_entity(id)
    }

    fn create_plotline(&self, plotline: &Plotline) -> Result<()> {
        self.inner.create_plotline(plotline)
    }

    fn get_plotline(&self, id: &str) -> Result<Option<Plotline>> {
        self.inner.get_plotline(id)
    }

    fn get_plotlines(
        &self,
        session_id: &str,
        status: Option<PlotlineStatus>,
    ) -> Result<Vec<Plotline>> {
        self.inner.get_plotlines(session_id, status)
    }

    fn update_plotline(&self, id: &str, update: PlotlineUpdate) -> Result<Option<Plotline>> {
        self.inner.update_plotline(id, update)
    }

    fn save_version(&self, version: &EntityVersion) -> Result<bool> {
        self.inner.save_version(version)
    }

    fn get_versions(&self, id: &EntityId, limit: usize) -> Result<Vec<EntityVersion>> {
        self.inner.get_versions(id, limit)
    }

    fn store_summary(&self, summary: &MemorySummary) -> Result<()> {
        self.inner.store_summary(summary)
    }

    fn get_summaries(&self, session_id: &str, limit: usize) -> Result<Vec<MemorySummary>> {
        self.inner.get_summaries(session_id, limit)
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::storage::InMemoryEntityStore;
    use serde_json::json;

    fn layer(capacity: usize) -> (CacheLayer, Arc<InMemoryEntityStore>) {
        let store = Arc::new(InMemoryEntityStore::new());
        let inner: Arc<dyn EntityStore> = store.clone();
        (CacheLayer::new(inner, capacity, None), store)
    }

    fn entity(n: i64) -> Entity {
        Entity::new("s1", EntityType::Object).with_field("n", json!(n))
    }

    #[test]
    fn test_store_is_write_through() {
        let (cache, store) = layer(4);
        let e = entity(1);
        cache.store(&e).unwrap();
        assert!(cache.contains(&e.id));
        assert_eq!(store.retrieve(&e.id).unwrap(), Some(e.clone()));
        assert_eq!(cache.retrieve(&e.id).unwrap(), Some(e));
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 0);
    }

    #[test]
    fn test_capacity_plus_one_evicts_lru() {
        let (cache, store) = layer(3);
        let entities: Vec<Entity> = (0..4).map(entity).collect();
        for e in &entities {
            store.store(e).unwrap();
        }
        for e in &entities {
            cache.retrieve(&e.id).unwrap();
        }
        let stats = cache.stats();
        assert_eq!(stats.misses, 4);
        assert_eq!(stats.size, 3);
        assert_eq!(stats.evictions, 1);
        assert!(!cache.contains(&entities[0].id));

        cache.retrieve(&entities[0].id).unwrap();
        assert_eq!(cache.stats().misses, 5);
        assert_eq!(
            cache.access_count(&entities[0].id),
            Some(AccessCount { hits: 0, misses: 2 })
        );
    }

    #[test]
    fn test_delete_and_tombstone_evict() {
        let (cache, _store) = layer(4);
        let a = entity(1);
        let b = entity(2);
        cache.store(&a).unwrap();
        cache.store(&b).unwrap();

        assert!(cache.delete(&a.id).unwrap());
        assert!(!cache.contains(&a.id));
        assert!(cache.retrieve(&a.id).unwrap().is_none());

        cache.set_active(&b.id, false).unwrap();
        assert!(!cache.contains(&b.id));
        assert!(cache.retrieve(&b.id).unwrap().is_none());
    }

    #[test]
    fn test_bypassing_writes_are_not_observed() {
        let (cache, store) = layer(4);
        let mut e = entity(1);
        cache.store(&e).unwrap();
        e.content.insert("n".to_string(), json!(99));
        store.store(&e).unwrap();
        let cached = cache.retrieve(&e.id).unwrap().unwrap();
        assert_eq!(cached.content["n"], json!(1));
        cache.invalidate(&e.id);
        let fresh = cache.retrieve(&e.id).unwrap().unwrap();
        assert_eq!(fresh.content["n"], json!(99));
    }

    #[test]
    fn test_miss_racing_delete_does_not_resurrect() {
        let (cache, store) = layer(4);
        let e = entity(1);
        store.store(&e).unwrap();

        // A miss reads the store, then a delete lands before the fill.
        let seen = cache.generation.load(Ordering::Relaxed);
        let loaded = store.retrieve(&e.id).unwrap().unwrap();
        assert!(cache.delete(&e.id).unwrap());
        assert!(!cache.fill(&loaded, seen));

        assert!(!cache.contains(&e.id));
        assert!(cache.retrieve(&e.id).unwrap().is_none());
    }

    #[test]
    fn test_miss_racing_tombstone_does_not_resurrect() {
        let (cache, store) = layer(4);
        let e = entity(1);
        store.store(&e).unwrap();

        let seen = cache.generation.load(Ordering::Relaxed);
        let loaded = store.retrieve(&e.id).unwrap().unwrap();
        cache.set_active(&e.id, false).unwrap();
        assert!(!cache.fill(&loaded, seen));
        assert!(cache.retrieve(&e.id).unwrap().is_none());
    }

    #[test]
    fn test_uncontended_miss_fills() {
        let (cache, store) = layer(4);
        let e = entity(1);
        store.store(&e).unwrap();
        assert_eq!(cache.retrieve(&e.id).unwrap(), Some(e.clone()));
        assert!(cache.contains(&e.id));
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..CacheStats::default()
        };
        assert_eq!(stats.hit_rate(), 0.75);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
