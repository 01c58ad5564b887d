//! In-memory entity store.
//!
//! Non-persistent implementation of [`EntityStore`] for tests and
//! throwaway sessions. Semantics match the `SQLite` store.

use crate::models::{
    Entity, EntityId, EntityQuery, EntityType, EntityVersion, Fact, MemorySummary, Plotline,
    PlotlineStatus, Relation, RelationType,
};
use crate::storage::traits::EntityStore;
use crate::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

type RelationKey = (EntityId, EntityId, RelationType);

#[derive(Debug, Default)]
struct Inner {
    /// Entity plus its active flag.
    entities: HashMap<EntityId, (Entity, bool)>,
    relations: BTreeMap<RelationKey, Relation>,
    facts: HashMap<String, Fact>,
    plotlines: HashMap<String, Plotline>,
    versions: BTreeMap<(EntityId, u32), EntityVersion>,
    summaries: HashMap<String, MemorySummary>,
}

/// In-memory entity store.
///
/// Uses a single `RwLock` so cascading deletes are atomic with respect to
/// readers. Data is not persisted between runs.
///
/// # Example
///
/// ```rust
/// use world_memory::storage::{EntityStore, InMemoryEntityStore};
/// use world_memory::{Entity, EntityType};
///
/// let store = InMemoryEntityStore::new();
/// let id = store.store(&Entity::new("s1", EntityType::Location)).unwrap();
/// assert!(store.retrieve(&id).unwrap().is_some());
/// ```
#[derive(Debug, Default)]
pub struct InMemoryEntityStore {
    inner: RwLock<Inner>,
}

impl InMemoryEntityStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored entities, including tombstoned ones.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.inner.read().map(|i| i.entities.len()).unwrap_or(0)
    }

    fn read(&self, operation: &str) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| Error::storage(operation, "lock poisoned"))
    }

    fn write(&self, operation: &str) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| Error::storage(operation, "lock poisoned"))
    }
}

impl EntityStore for InMemoryEntityStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn store(&self, entity: &Entity) -> Result<EntityId> {
        let mut inner = self.write("store_entity")?;
        inner
            .entities
            .insert(entity.id.clone(), (entity.clone(), true));
        Ok(entity.id.clone())
    }

    fn retrieve(&self, id: &EntityId) -> Result<Option<Entity>> {
        let inner = self.read("retrieve_entity")?;
        Ok(inner
            .entities
            .get(id)
            .filter(|(_, active)| *active)
            .map(|(e, _)| e.clone()))
    }

    fn query(&self, query: &EntityQuery) -> Result<Vec<Entity>> {
        let inner = self.read("query_entities")?;
        let mut matched: Vec<&Entity> = inner
            .entities
            .values()
            .filter(|(e, active)| query.matches(e, *active))
            .map(|(e, _)| e)
            .collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(matched
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    fn delete(&self, id: &EntityId) -> Result<bool> {
        let mut inner = self.write("delete_entity")?;
        let existed = inner.entities.remove(id).is_some();
        inner.relations.retain(|_, r| !r.touches(id));
        inner.versions.retain(|(entity_id, _), _| entity_id != id);
        for fact in inner.facts.values_mut() {
            fact.entity_associations.retain(|a| &a.entity_id != id);
            if fact.source_entity_id.as_ref() == Some(id) {
                fact.source_entity_id = None;
            }
            if fact.target_entity_id.as_ref() == Some(id) {
                fact.target_entity_id = None;
            }
        }
        for plotline in inner.plotlines.values_mut() {
            plotline.entity_associations.retain(|a| &a.entity_id != id);
        }
        Ok(existed)
    }

    fn set_active(&self, id: &EntityId, active: bool) -> Result<bool> {
        let mut inner = self.write("set_active")?;
        Ok(inner
            .entities
            .get_mut(id)
            .map(|(_, flag)| *flag = active)
            .is_some())
    }

    fn count_by_type(&self, session_id: Option<&str>) -> Result<HashMap<EntityType, usize>> {
        let inner = self.read("count_by_type")?;
        let mut counts = HashMap::new();
        for (entity, active) in inner.entities.values() {
            if *active && session_id.is_none_or(|s| s == entity.session_id) {
                *counts.entry(entity.entity_type).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    fn add_relation(&self, relation: &Relation) -> Result<()> {
        let mut inner = self.write("add_relation")?;
        let key = (
            relation.source_id.clone(),
            relation.target_id.clone(),
            relation.relation_type,
        );
        inner.relations.insert(key, relation.clone());
        Ok(())
    }

    fn remove_relation(
        &self,
        source_id: &EntityId,
        target_id: &EntityId,
        relation_type: RelationType,
    ) -> Result<bool> {
        let mut inner = self.write("remove_relation")?;
        let key = (source_id.clone(), target_id.clone(), relation_type);
        Ok(inner.relations.remove(&key).is_some())
    }

    fn get_related(
        &self,
        id: &EntityId,
        relation_type: Option<RelationType>,
    ) -> Result<Vec<Relation>> {
        let inner = self.read("get_related")?;
        let mut related: Vec<Relation> = inner
            .relations
            .values()
            .filter(|r| r.touches(id) && relation_type.is_none_or(|t| t == r.relation_type))
            .cloned()
            .collect();
        related.sort_by(|a, b| b.strength.total_cmp(&a.strength));
        Ok(related)
    }

    fn list_relations(&self, session_id: Option<&str>) -> Result<Vec<Relation>> {
        let inner = self.read("list_relations")?;
        let in_session = |id: &EntityId| {
            inner
                .entities
                .get(id)
                .is_some_and(|(e, _)| session_id.is_some_and(|s| s == e.session_id))
        };
        Ok(inner
            .relations
            .values()
            .filter(|r| session_id.is_none() || in_session(&r.source_id) || in_session(&r.target_id))
            .cloned()
            .collect())
    }

    fn store_fact(&self, fact: &Fact) -> Result<()> {
        let mut inner = self.write("store_fact")?;
        inner.facts.insert(fact.id.clone(), fact.clone());
        Ok(())
    }

    fn get_facts(&self, session_id: &str, limit: usize) -> Result<Vec<Fact>> {
        let inner = self.read("get_facts")?;
        let mut facts: Vec<Fact> = inner
            .facts
            .values()
            .filter(|f| f.session_id == session_id)
            .cloned()
            .collect();
        facts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
        facts.truncate(limit);
        Ok(facts)
    }

    fn get_facts_for_entity(&self, id: &EntityId) -> Result<Vec<Fact>> {
        let inner = self.read("get_facts_for_entity")?;
        let mut facts: Vec<Fact> = inner
            .facts
            .values()
            .filter(|f| f.referenced_entities().contains(&id))
            .cloned()
            .collect();
        facts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
        Ok(facts)
    }

    fn create_plotline(&self, plotline: &Plotline) -> Result<()> {
        let mut inner = self.write("create_plotline")?;
        inner.plotlines.insert(plotline.id.clone(), plotline.clone());
        Ok(())
    }

    fn get_plotline(&self, id: &str) -> Result<Option<Plotline>> {
        let inner = self.read("get_plotline")?;
        Ok(inner.plotlines.get(id).cloned())
    }

    fn get_plotlines(
        &self,
        session_id: &str,
        status: Option<PlotlineStatus>,
    ) -> Result<Vec<Plotline>> {
        let inner = self.read("get_plotlines")?;
        let mut plotlines: Vec<Plotline> = inner
            .plotlines
            .values()
            .filter(|p| p.session_id == session_id && status.is_none_or(|s| s == p.status))
            .cloned()
            .collect();
        plotlines.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.start_time.cmp(&b.start_time))
        });
        Ok(plotlines)
    }

    fn save_version(&self, version: &EntityVersion) -> Result<bool> {
        let mut inner = self.write("save_version")?;
        let key = (version.entity_id.clone(), version.version);
        if inner.versions.contains_key(&key) {
            return Ok(false);
        }
        inner.versions.insert(key, version.clone());
        Ok(true)
    }

    fn get_versions(&self, id: &EntityId, limit: usize) -> Result<Vec<EntityVersion>> {
        let inner = self.read("get_versions")?;
        Ok(inner
            .versions
            .range((id.clone(), 0)..=(id.clone(), u32::MAX))
            .rev()
            .take(limit)
            .map(|(_, v)| v.clone())
            .collect())
    }

    fn store_summary(&self, summary: &MemorySummary) -> Result<()> {
        let mut inner = self.write("store_summary")?;
        inner.summaries.insert(summary.id.clone(), summary.clone());
        Ok(())
    }

    fn get_summaries(&self, session_id: &str, limit: usize) -> Result<Vec<MemorySummary>> {
        let inner = self.read("get_summaries")?;
        let mut summaries: Vec<MemorySummary> = inner
            .summaries
            .values()
            .filter(|s| s.session_id == session_id)
            .cloned()
            .collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        summaries.truncate(limit);
        Ok(summaries)
    }
}
