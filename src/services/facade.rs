//! The single entry point callers use to work with world memory.
//!
//! [`MemoryFacade`] composes the write-through cache, the structured store,
//! the semantic index, the summarizer and the consistency checker:
//!
//! - writes go to the cache (and through it, durably, to the store) and then
//!   to the vector index for searchable types
//! - reads check the cache first and fall back to the store
//! - summaries and consistency checks run over snapshots copied up front,
//!   holding no lock while they analyze
//!
//! The store and the index are independently consistent, not jointly atomic:
//! a vector failure after a successful durable write is reported to the
//! caller, and the entity stays stored.

use super::backend_factory::BackendFactory;
use super::consistency::{ConsistencyChecker, IssueRegistry};
use super::summarizer::{Summarizer, SummaryOptions, importance_score};
use super::VectorIndex;
use crate::cache::{CacheLayer, CacheStats};
use crate::config::MemoryConfig;
use crate::models::{
    ConsistencyIssue, Edge, Entity, EntityId, EntityQuery, EntityType, EntityUpdate,
    EntityVersion, Fact, ImportStats, MemoryStats, MemorySummary, NetworkNode, Plotline,
    PlotlineStatus, PlotlineUpdate, Relation, RelationType, RelationshipNetwork,
    SNAPSHOT_FORMAT_VERSION, SnapshotEntity, TimelineEntry, WorldSnapshot,
};
use crate::storage::{EntityStore, VectorFilter};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::instrument;

/// Characters kept in timeline content summaries.
const TIMELINE_SUMMARY_CHARS: usize = 120;

/// Unified world memory API.
///
/// # Example
///
/// ```rust
/// use world_memory::{Entity, EntityType, EntityUpdate, MemoryConfig, MemoryFacade};
/// use serde_json::json;
///
/// let memory = MemoryFacade::from_config(&MemoryConfig::in_memory())?;
/// let id = memory.store(
///     Entity::new("session-1", EntityType::Character).with_field("name", json!("Mira")),
/// )?;
/// memory.update(&id, EntityUpdate::new().set("status", json!("wounded")))?;
/// let mira = memory.retrieve(&id)?.ok_or_else(|| world_memory::Error::NotFound(id.to_string()))?;
/// assert_eq!(mira.version, 2);
/// # Ok::<(), world_memory::Error>(())
/// ```
pub struct MemoryFacade {
    cache: Arc<CacheLayer>,
    vector: Option<VectorIndex>,
    summarizer: Option<Summarizer>,
    checker: Option<ConsistencyChecker>,
    issues: IssueRegistry,
    max_depth: usize,
    purge_after_days: u32,
}

impl MemoryFacade {
    /// Builds every component `config` enables.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the structured
    /// store cannot be opened.
    pub fn from_config(config: &MemoryConfig) -> Result<Self> {
        config.validate()?;
        let backends = BackendFactory::create_all(config)?;
        let mut facade = Self::new(backends.store, backends.vector, config);
        if let Some(llm) = backends.llm {
            if let Some(summarizer) = facade.summarizer.take() {
                tracing::info!(provider = llm.name(), "Summaries will use an LLM");
                facade.summarizer = Some(summarizer.with_llm(llm));
            }
        }
        Ok(facade)
    }

    /// Assembles a facade from an explicit store and optional index.
    ///
    /// The store is wrapped in a [`CacheLayer`] sized from `config`.
    #[must_use]
    pub fn new(
        store: Arc<dyn EntityStore>,
        vector: Option<VectorIndex>,
        config: &MemoryConfig,
    ) -> Self {
        let ttl = config.cache.ttl_secs.map(Duration::from_secs);
        let cache = Arc::new(CacheLayer::new(store, config.cache.capacity, ttl));
        Self {
            cache,
            vector,
            summarizer: config
                .features
                .summarizer
                .then(|| Summarizer::new(config.summary.clone())),
            checker: config
                .features
                .consistency
                .then(|| ConsistencyChecker::new(&config.consistency)),
            issues: IssueRegistry::new(),
            max_depth: config.graph.max_relationships_depth,
            purge_after_days: config.consistency.purge_after_days,
        }
    }

    /// Replaces the summarizer.
    #[must_use]
    pub fn with_summarizer(mut self, summarizer: Summarizer) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Replaces the consistency checker.
    #[must_use]
    pub fn with_checker(mut self, checker: ConsistencyChecker) -> Self {
        self.checker = Some(checker);
        self
    }

    /// The write-through cache (and, through it, the store).
    #[must_use]
    pub fn cache(&self) -> &CacheLayer {
        &self.cache
    }

    /// Cache statistics.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// The semantic index, if enabled.
    #[must_use]
    pub const fn vector_index(&self) -> Option<&VectorIndex> {
        self.vector.as_ref()
    }

    /// The issue registry fed by consistency checks.
    #[must_use]
    pub const fn issues(&self) -> &IssueRegistry {
        &self.issues
    }

    fn index(&self, entity: &Entity) -> Result<()> {
        match &self.vector {
            Some(vector) if entity.entity_type.is_searchable() => vector.index_entity(entity),
            _ => Ok(()),
        }
    }

    fn unindex(&self, id: &EntityId) -> Result<()> {
        if let Some(vector) = &self.vector {
            vector.remove(id)?;
        }
        Ok(())
    }

    // ========================================================================
    // Entities
    // ========================================================================

    /// Stores an entity and writes its initial version row.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an empty session id or version 0,
    /// [`Error::Storage`] if the durable write fails, and [`Error::Retrieval`]
    /// if indexing fails after the entity was stored.
    #[instrument(skip(self, entity), fields(operation = "store", entity_id = %entity.id, session_id = %entity.session_id))]
    pub fn store(&self, mut entity: Entity) -> Result<EntityId> {
        let start = Instant::now();
        let result = (|| {
            if entity.session_id.trim().is_empty() {
                return Err(Error::InvalidInput("session_id must not be empty".to_string()));
            }
            if entity.version == 0 {
                return Err(Error::InvalidInput("version starts at 1".to_string()));
            }
            entity.updated_at = entity.updated_at.max(entity.created_at);

            let id = self.cache.store(&entity)?;
            self.cache.save_version(&EntityVersion::initial(&entity))?;
            if let Err(e) = self.index(&entity) {
                tracing::warn!(entity_id = %id, error = %e, "Entity stored but not indexed");
                return Err(e);
            }
            Ok(id)
        })();
        observe("store", start, &result);
        result
    }

    /// Retrieves an active entity, serving from the cache when possible.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the store read fails.
    #[instrument(skip(self), fields(operation = "retrieve", entity_id = %id))]
    pub fn retrieve(&self, id: &EntityId) -> Result<Option<Entity>> {
        let start = Instant::now();
        let result = self.cache.retrieve(id);
        observe("retrieve", start, &result);
        result
    }

    /// Returns active entities matching `query`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the store read fails.
    pub fn query(&self, query: &EntityQuery) -> Result<Vec<Entity>> {
        let start = Instant::now();
        let result = self.cache.query(query);
        observe("query", start, &result);
        result
    }

    /// Returns up to `limit` entities of one type in a session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the store read fails.
    pub fn query_by_type(
        &self,
        session_id: &str,
        entity_type: EntityType,
        limit: usize,
    ) -> Result<Vec<Entity>> {
        self.cache.query_by_type(session_id, entity_type, limit)
    }

    /// Applies a partial update.
    ///
    /// Named top-level content fields are replaced, every other field is
    /// kept, and the version goes up by exactly one. Returns `false` if the
    /// entity does not exist or the update is empty.
    ///
    /// Concurrent updates to the same id are not serialized: the last write
    /// wins on the entity row. If another writer already recorded the same
    /// version number, the version row is left as it was and a warning is
    /// logged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] or [`Error::Retrieval`] from the underlying writes.
    #[instrument(skip(self, update), fields(operation = "update", entity_id = %id))]
    pub fn update(&self, id: &EntityId, update: EntityUpdate) -> Result<bool> {
        let start = Instant::now();
        let result = (|| {
            if update.is_empty() {
                return Ok(false);
            }
            let Some(mut entity) = self.cache.retrieve(id)? else {
                return Ok(false);
            };
            let changed = update.apply_to(&mut entity);
            self.cache.store(&entity)?;

            let version = EntityVersion::capture(&entity, changed.clone())
                .with_changed_by(update.changed_by.clone());
            let version = match &update.reason {
                Some(reason) => version.with_reason(reason.clone()),
                None => version,
            };
            if !self.cache.save_version(&version)? {
                tracing::warn!(
                    entity_id = %id,
                    version = entity.version,
                    "Version row already written by a concurrent update; last write wins"
                );
                metrics::counter!("entity_update_conflicts_total").increment(1);
            }
            if !changed.is_empty() {
                self.index(&entity)?;
            }
            Ok(true)
        })();
        observe("update", start, &result);
        result
    }

    /// Physically deletes an entity from the cache, the store and the index,
    /// together with its incident relations and version history.
    ///
    /// History is append-only while the entity exists; deleting it erases the
    /// history too. [`Self::tombstone`] hides an entity and keeps its history.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] or [`Error::Retrieval`] from the underlying deletes.
    #[instrument(skip(self), fields(operation = "delete", entity_id = %id))]
    pub fn delete(&self, id: &EntityId) -> Result<bool> {
        let start = Instant::now();
        let result = (|| {
            let removed = self.cache.delete(id)?;
            self.unindex(id)?;
            Ok(removed)
        })();
        observe("delete", start, &result);
        result
    }

    /// Hides an entity from reads, queries and search without deleting it.
    ///
    /// Relations and history are kept. Returns `false` if the entity does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] or [`Error::Retrieval`] from the underlying writes.
    #[instrument(skip(self), fields(operation = "tombstone", entity_id = %id))]
    pub fn tombstone(&self, id: &EntityId) -> Result<bool> {
        let start = Instant::now();
        let result = (|| {
            if !self.cache.set_active(id, false)? {
                return Ok(false);
            }
            self.unindex(id)?;
            Ok(true)
        })();
        observe("tombstone", start, &result);
        result
    }

    /// Reverses [`Self::tombstone`] and re-indexes the entity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] or [`Error::Retrieval`] from the underlying writes.
    #[instrument(skip(self), fields(operation = "restore", entity_id = %id))]
    pub fn restore(&self, id: &EntityId) -> Result<bool> {
        let start = Instant::now();
        let result = (|| {
            if !self.cache.set_active(id, true)? {
                return Ok(false);
            }
            if let Some(entity) = self.cache.retrieve(id)? {
                self.index(&entity)?;
            }
            Ok(true)
        })();
        observe("restore", start, &result);
        result
    }

    /// Re-embeds every active searchable entity, optionally for one session.
    ///
    /// Used to warm an in-process vector index from the durable store.
    /// Returns the number of entities indexed; zero without a vector index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] or [`Error::Retrieval`] from the underlying calls.
    #[instrument(skip(self), fields(operation = "reindex"))]
    pub fn reindex(&self, session_id: Option<&str>) -> Result<usize> {
        let Some(vector) = &self.vector else {
            return Ok(0);
        };
        let mut query = EntityQuery::new();
        if let Some(session_id) = session_id {
            query = query.in_session(session_id);
        }
        let mut indexed = 0;
        for entity in self.cache.inner().query(&query)? {
            if entity.entity_type.is_searchable() {
                vector.index_entity(&entity)?;
                indexed += 1;
            }
        }
        tracing::info!(indexed, backend = vector.backend_name(), "Reindexed entities");
        Ok(indexed)
    }

    /// Version history, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the read fails.
    pub fn history(&self, id: &EntityId, limit: usize) -> Result<Vec<EntityVersion>> {
        self.cache.get_versions(id, limit)
    }

    /// Restores the content recorded at `version` as a new version.
    ///
    /// History stays append-only: rolling back from version 5 to version 2
    /// produces version 6 with version 2's content.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the entity or the version does not exist.
    #[instrument(skip(self), fields(operation = "rollback", entity_id = %id, target_version = version))]
    pub fn rollback(&self, id: &EntityId, version: u32) -> Result<Entity> {
        let Some(mut entity) = self.cache.retrieve(id)? else {
            return Err(Error::NotFound(format!("entity {id}")));
        };
        let Some(target) = self
            .cache
            .get_versions(id, usize::MAX)?
            .into_iter()
            .find(|v| v.version == version)
        else {
            return Err(Error::NotFound(format!("version {version} of entity {id}")));
        };

        let keys: BTreeSet<&String> = entity
            .content
            .keys()
            .chain(target.content_snapshot.keys())
            .collect();
        let changed: Vec<String> = keys
            .into_iter()
            .filter(|k| entity.content.get(*k) != target.content_snapshot.get(*k))
            .cloned()
            .collect();

        entity.content = target.content_snapshot;
        entity.version += 1;
        entity.updated_at = crate::now().max(entity.created_at);
        self.cache.store(&entity)?;
        self.cache.save_version(
            &EntityVersion::capture(&entity, changed).with_reason(format!("rollback to v{version}")),
        )?;
        self.index(&entity)?;
        Ok(entity)
    }

    // ========================================================================
    // Relations
    // ========================================================================

    /// Adds or replaces a relation. Endpoints are not checked; dangling
    /// relations are reported by consistency checks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the write fails.
    #[instrument(skip(self, relation), fields(operation = "add_relation", source = %relation.source_id, target = %relation.target_id))]
    pub fn add_relation(&self, relation: &Relation) -> Result<()> {
        self.cache.add_relation(relation)
    }

    /// Removes a relation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the delete fails.
    pub fn remove_relation(
        &self,
        source_id: &EntityId,
        target_id: &EntityId,
        relation_type: RelationType,
    ) -> Result<bool> {
        self.cache.remove_relation(source_id, target_id, relation_type)
    }

    /// Relations touching `id`, optionally of one type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the read fails.
    pub fn get_related(
        &self,
        id: &EntityId,
        relation_type: Option<RelationType>,
    ) -> Result<Vec<Relation>> {
        self.cache.get_related(id, relation_type)
    }

    // ========================================================================
    // Search
    // ========================================================================

    /// Finds entities similar to `text`, best first.
    ///
    /// Without a vector index, or when the index fails, this degrades to
    /// keyword search over the store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if loading results fails.
    #[instrument(skip(self, filter), fields(operation = "semantic_search"))]
    pub fn semantic_search(
        &self,
        text: &str,
        filter: &VectorFilter,
        limit: usize,
    ) -> Result<Vec<Entity>> {
        let start = Instant::now();
        let result = match self.vector_hits(text, filter, limit) {
            Some(ids) => self.load_all(ids.into_iter().map(|(id, _)| id)),
            None => self.keyword_search(text, filter, limit),
        };
        observe("semantic_search", start, &result);
        result
    }

    /// Vector hits, or `None` when the caller should fall back to keywords.
    fn vector_hits(
        &self,
        text: &str,
        filter: &VectorFilter,
        limit: usize,
    ) -> Option<Vec<(EntityId, f32)>> {
        let vector = self.vector.as_ref()?;
        match vector.search_text(text, filter, limit) {
            Ok(hits) => Some(hits),
            Err(e) => {
                tracing::warn!(error = %e, "Semantic search failed, degrading to keyword search");
                metrics::counter!("search_degraded_total").increment(1);
                None
            },
        }
    }

    fn load_all(&self, ids: impl IntoIterator<Item = EntityId>) -> Result<Vec<Entity>> {
        let mut out = Vec::new();
        for id in ids {
            // Stale index entries (deleted elsewhere) are skipped.
            if let Some(entity) = self.cache.retrieve(&id)? {
                out.push(entity);
            }
        }
        Ok(out)
    }

    /// Ranks entities by how many query words their content contains.
    fn keyword_search(
        &self,
        text: &str,
        filter: &VectorFilter,
        limit: usize,
    ) -> Result<Vec<Entity>> {
        let words: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect();
        if words.is_empty() {
            return Ok(Vec::new());
        }

        let mut query = EntityQuery::new();
        query.session_id.clone_from(&filter.session_id);
        query.entity_types.clone_from(&filter.entity_types);
        let mut scored: Vec<(usize, Entity)> = self
            .cache
            .query(&query)?
            .into_iter()
            .filter_map(|e| {
                let haystack = e.searchable_text().to_lowercase();
                let score = words.iter().filter(|w| haystack.contains(w.as_str())).count();
                (score > 0).then_some((score, e))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.created_at.cmp(&a.1.created_at)));
        Ok(scored.into_iter().take(limit).map(|(_, e)| e).collect())
    }

    /// Vector results first, then keyword results from the store, without duplicates.
    ///
    /// `keywords` supplies the store-side filter; its session and types also
    /// scope the vector search.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the store query fails.
    #[instrument(skip(self, keywords), fields(operation = "hybrid_search"))]
    pub fn hybrid_search(
        &self,
        text: &str,
        keywords: &EntityQuery,
        limit: usize,
    ) -> Result<Vec<Entity>> {
        let mut filter = VectorFilter::new();
        filter.session_id.clone_from(&keywords.session_id);
        filter.entity_types.clone_from(&keywords.entity_types);

        let mut seen: HashSet<EntityId> = HashSet::new();
        let mut results = Vec::new();
        if let Some(hits) = self.vector_hits(text, &filter, limit) {
            for entity in self.load_all(hits.into_iter().map(|(id, _)| id))? {
                if seen.insert(entity.id.clone()) {
                    results.push(entity);
                }
            }
        }

        let keyword_matches = if keywords.keywords.is_empty() {
            self.keyword_search(text, &filter, limit)?
        } else {
            self.cache.query(keywords)?
        };
        for entity in keyword_matches {
            if results.len() >= limit {
                break;
            }
            if seen.insert(entity.id.clone()) {
                results.push(entity);
            }
        }
        results.truncate(limit);
        Ok(results)
    }

    // ========================================================================
    // Derived views
    // ========================================================================

    /// Entities created in `[start, end]`, oldest first, as timeline rows.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the read fails.
    #[instrument(skip(self), fields(operation = "get_timeline"))]
    pub fn get_timeline(
        &self,
        session_id: Option<&str>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<TimelineEntry>> {
        let mut query = EntityQuery::new().between(start, end);
        if let Some(session_id) = session_id {
            query = query.in_session(session_id);
        }
        let now = crate::now();
        let mut entries: Vec<TimelineEntry> = self
            .cache
            .query(&query)?
            .iter()
            .map(|e| TimelineEntry {
                timestamp: e.created_at,
                entity_id: e.id.clone(),
                entity_type: e.entity_type,
                content_summary: e.content_summary(TIMELINE_SUMMARY_CHARS),
                importance: importance_score(e, now),
            })
            .collect();
        entries.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.entity_id.cmp(&b.entity_id))
        });
        Ok(entries)
    }

    /// Breadth-first neighbourhood of `root`, at most `depth` hops away.
    ///
    /// `depth` is capped at the configured maximum. Cycles terminate on the
    /// visited set; relations to missing or tombstoned entities are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if `root` does not exist.
    #[instrument(skip(self), fields(operation = "get_relationship_network", entity_id = %root))]
    pub fn get_relationship_network(
        &self,
        root: &EntityId,
        depth: usize,
    ) -> Result<RelationshipNetwork> {
        let max_depth = depth.min(self.max_depth);
        let Some(root_entity) = self.cache.retrieve(root)? else {
            return Err(Error::NotFound(format!("entity {root}")));
        };

        let mut network = RelationshipNetwork {
            root: Some(root.clone()),
            ..RelationshipNetwork::default()
        };
        network.nodes.insert(root.clone(), node(&root_entity, 0));

        // Arena of visited ids; the queue holds indices into it.
        let mut arena: Vec<(EntityId, usize)> = vec![(root.clone(), 0)];
        let mut visited: HashSet<EntityId> = HashSet::from([root.clone()]);
        let mut queue: VecDeque<usize> = VecDeque::from([0]);
        let mut seen_edges: HashSet<(EntityId, EntityId, RelationType)> = HashSet::new();

        while let Some(index) = queue.pop_front() {
            let (id, level) = arena[index].clone();
            if level >= max_depth {
                continue;
            }
            for relation in self.cache.get_related(&id, None)? {
                let Some(other) = relation.other_end(&id).cloned() else {
                    continue;
                };
                if !visited.contains(&other) {
                    let Some(entity) = self.cache.retrieve(&other)? else {
                        continue;
                    };
                    network.nodes.insert(other.clone(), node(&entity, level + 1));
                    visited.insert(other.clone());
                    arena.push((other, level + 1));
                    queue.push_back(arena.len() - 1);
                }
                let key = (
                    relation.source_id.clone(),
                    relation.target_id.clone(),
                    relation.relation_type,
                );
                if seen_edges.insert(key) {
                    network.edges.push(Edge::from(&relation));
                }
            }
        }
        Ok(network)
    }

    // ========================================================================
    // Summaries
    // ========================================================================

    fn session_entities(
        &self,
        session_id: &str,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Vec<Entity>> {
        let mut query = EntityQuery::new().in_session(session_id);
        if let Some((start, end)) = range {
            query = query.between(Some(start), Some(end));
        }
        self.cache.query(&query)
    }

    /// Summarizes a session (optionally a time range) with the configured
    /// strategy and format, persisting the result.
    ///
    /// Returns `None` if summarization is disabled or nothing was selected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if loading entities or saving the summary fails.
    pub fn summarize(
        &self,
        session_id: &str,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Option<MemorySummary>> {
        self.summarize_with(session_id, range, &SummaryOptions::default())
    }

    /// [`Self::summarize`] with per-call options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if loading entities or saving the summary fails.
    #[instrument(skip(self, options), fields(operation = "summarize", session_id = %session_id))]
    pub fn summarize_with(
        &self,
        session_id: &str,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
        options: &SummaryOptions,
    ) -> Result<Option<MemorySummary>> {
        let Some(summarizer) = &self.summarizer else {
            return Ok(None);
        };
        let snapshot = self.session_entities(session_id, range)?;
        let Some(summary) = summarizer.summarize_with(session_id, &snapshot, options) else {
            return Ok(None);
        };
        self.cache.store_summary(&summary)?;
        Ok(Some(summary))
    }

    /// Summarizes only if the session has crossed the size or span thresholds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if loading entities or saving the summary fails.
    pub fn compact(&self, session_id: &str) -> Result<Option<MemorySummary>> {
        let Some(summarizer) = &self.summarizer else {
            return Ok(None);
        };
        let snapshot = self.session_entities(session_id, None)?;
        if !summarizer.should_summarize(&snapshot) {
            tracing::debug!(session_id, entities = snapshot.len(), "Compaction not needed");
            return Ok(None);
        }
        let Some(summary) = summarizer.summarize(session_id, &snapshot) else {
            return Ok(None);
        };
        self.cache.store_summary(&summary)?;
        Ok(Some(summary))
    }

    /// Extends a stored summary with new entities and persists the new version.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if loading entities or saving the summary fails.
    pub fn extend_summary(
        &self,
        previous: &MemorySummary,
        new_entities: &[Entity],
    ) -> Result<Option<MemorySummary>> {
        let Some(summarizer) = &self.summarizer else {
            return Ok(None);
        };
        let covered = self.load_all(previous.original_entity_ids.iter().cloned())?;
        let Some(summary) = summarizer.update_summary(previous, new_entities, &covered) else {
            return Ok(None);
        };
        self.cache.store_summary(&summary)?;
        Ok(Some(summary))
    }

    /// Persisted summaries of a session, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the read fails.
    pub fn get_summaries(&self, session_id: &str, limit: usize) -> Result<Vec<MemorySummary>> {
        self.cache.get_summaries(session_id, limit)
    }

    // ========================================================================
    // Consistency
    // ========================================================================

    /// Checks an explicit snapshot and records the findings.
    ///
    /// Returns an empty list if consistency checking is disabled.
    #[instrument(skip(self, entities, relations), fields(operation = "check_consistency"))]
    pub fn check_consistency(
        &self,
        entities: &[Entity],
        relations: &[Relation],
    ) -> Vec<ConsistencyIssue> {
        let Some(checker) = &self.checker else {
            return Vec::new();
        };
        let issues = checker.check(entities, relations);
        let added = self.issues.record(&issues);
        tracing::info!(found = issues.len(), new = added, "Consistency check complete");
        issues
    }

    /// Snapshots a session's active entities and relations, then checks them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the snapshot cannot be read.
    pub fn check_session(&self, session_id: &str) -> Result<Vec<ConsistencyIssue>> {
        let entities = self.session_entities(session_id, None)?;
        let relations = self.cache.list_relations(Some(session_id))?;
        Ok(self.check_consistency(&entities, &relations))
    }

    /// Marks a recorded issue resolved.
    pub fn resolve_issue(&self, issue_id: &str) -> bool {
        self.issues.mark_resolved(issue_id)
    }

    /// Drops resolved issues older than the configured retention.
    pub fn purge_resolved_issues(&self) -> usize {
        self.issues.purge_older_than(self.purge_after_days)
    }

    // ========================================================================
    // Facts and plotlines
    // ========================================================================

    /// Stores a fact and its entity associations.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the write fails.
    pub fn store_fact(&self, fact: &Fact) -> Result<()> {
        self.cache.store_fact(fact)
    }

    /// Newest facts of a session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the read fails.
    pub fn get_facts(&self, session_id: &str, limit: usize) -> Result<Vec<Fact>> {
        self.cache.get_facts(session_id, limit)
    }

    /// Facts referencing an entity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the read fails.
    pub fn get_facts_for_entity(&self, id: &EntityId) -> Result<Vec<Fact>> {
        self.cache.get_facts_for_entity(id)
    }

    /// Creates (or replaces) a plotline.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the write fails.
    pub fn create_plotline(&self, plotline: &Plotline) -> Result<()> {
        self.cache.create_plotline(plotline)
    }

    /// Plotlines of a session, highest priority first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the read fails.
    pub fn get_plotlines(
        &self,
        session_id: &str,
        status: Option<PlotlineStatus>,
    ) -> Result<Vec<Plotline>> {
        self.cache.get_plotlines(session_id, status)
    }

    /// Partially updates a plotline.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the read or write fails.
    pub fn update_plotline(&self, id: &str, update: PlotlineUpdate) -> Result<Option<Plotline>> {
        self.cache.update_plotline(id, update)
    }

    // ========================================================================
    // Export, import, diagnostics
    // ========================================================================

    /// Dumps entities (tombstoned included), relations, facts, plotlines and
    /// summaries, for one session or for everything.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if any read fails.
    #[instrument(skip(self), fields(operation = "export"))]
    pub fn export(&self, session_id: Option<&str>) -> Result<WorldSnapshot> {
        let mut query = EntityQuery::new().including_inactive();
        if let Some(session_id) = session_id {
            query = query.in_session(session_id);
        }
        let inner = self.cache.inner();
        let all = inner.query(&query)?;
        let active_query = EntityQuery {
            include_inactive: false,
            ..query
        };
        let active: HashSet<EntityId> = inner
            .query(&active_query)?
            .into_iter()
            .map(|e| e.id)
            .collect();

        let sessions: BTreeSet<String> = match session_id {
            Some(s) => BTreeSet::from([s.to_string()]),
            None => all.iter().map(|e| e.session_id.clone()).collect(),
        };
        let mut snapshot = WorldSnapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            exported_at: Some(crate::now()),
            session_id: session_id.map(str::to_string),
            relations: inner.list_relations(session_id)?,
            ..WorldSnapshot::default()
        };
        for session in &sessions {
            snapshot.facts.extend(inner.get_facts(session, usize::MAX)?);
            snapshot.plotlines.extend(inner.get_plotlines(session, None)?);
            snapshot.summaries.extend(inner.get_summaries(session, usize::MAX)?);
        }
        snapshot.entities = all
            .into_iter()
            .map(|entity| SnapshotEntity {
                is_active: active.contains(&entity.id),
                entity,
            })
            .collect();
        tracing::info!(
            entities = snapshot.entities.len(),
            relations = snapshot.relations.len(),
            "Exported world snapshot"
        );
        Ok(snapshot)
    }

    /// Loads a snapshot. Everything is upserted, so importing the same
    /// snapshot twice leaves the same state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an unknown format version, and
    /// store or index errors otherwise.
    #[instrument(skip(self, snapshot), fields(operation = "import"))]
    pub fn import(&self, snapshot: &WorldSnapshot) -> Result<ImportStats> {
        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidInput(format!(
                "snapshot format {} is newer than supported format {SNAPSHOT_FORMAT_VERSION}",
                snapshot.format_version
            )));
        }

        let mut stats = ImportStats::default();
        for item in &snapshot.entities {
            let entity = &item.entity;
            self.cache.store(entity)?;
            self.cache
                .save_version(&EntityVersion::capture(entity, Vec::new()).with_reason("imported"))?;
            if item.is_active {
                if self.vector.is_some() && entity.entity_type.is_searchable() {
                    self.index(entity)?;
                    stats.indexed += 1;
                }
            } else {
                self.cache.set_active(&entity.id, false)?;
                self.unindex(&entity.id)?;
            }
            stats.entities += 1;
        }
        for relation in &snapshot.relations {
            self.cache.add_relation(relation)?;
            stats.relations += 1;
        }
        for fact in &snapshot.facts {
            self.cache.store_fact(fact)?;
            stats.facts += 1;
        }
        for plotline in &snapshot.plotlines {
            self.cache.create_plotline(plotline)?;
            stats.plotlines += 1;
        }
        for summary in &snapshot.summaries {
            self.cache.store_summary(summary)?;
            stats.summaries += 1;
        }
        tracing::info!(?stats, "Imported world snapshot");
        Ok(stats)
    }

    /// Counts and health figures for one session or everything.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the store cannot be read.
    pub fn stats(&self, session_id: Option<&str>) -> Result<MemoryStats> {
        let entities_by_type = self.cache.count_by_type(session_id)?;
        let cache = self.cache.stats();
        let vector_points = self.vector.as_ref().and_then(|v| match v.count() {
            Ok(n) => Some(n),
            Err(e) => {
                tracing::warn!(error = %e, "Vector count unavailable");
                None
            },
        });
        Ok(MemoryStats {
            total_entities: entities_by_type.values().sum(),
            entities_by_type,
            relations: self.cache.list_relations(session_id)?.len(),
            vector_points,
            cache_hits: cache.hits,
            cache_misses: cache.misses,
            cache_hit_rate: cache.hit_rate(),
            open_issues: self.issues.unresolved_count(),
        })
    }
}

fn node(entity: &Entity, depth: usize) -> NetworkNode {
    NetworkNode {
        entity_type: entity.entity_type,
        name: entity.display_name().to_string(),
        depth,
    }
}

fn observe<T>(operation: &'static str, start: Instant, result: &Result<T>) {
    let status = if result.is_ok() { "success" } else { "error" };
    metrics::counter!(
        "entity_operations_total",
        "operation" => operation,
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        "entity_operation_duration_ms",
        "operation" => operation
    )
    .record(start.elapsed().as_secs_f64() * 1000.0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::models::IssueType;
    use crate::storage::{InMemoryEntityStore, VectorBackend, VectorMetadata};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn facade() -> MemoryFacade {
        MemoryFacade::from_config(&MemoryConfig::in_memory()).unwrap()
    }

    fn character(name: &str) -> Entity {
        Entity::new("s1", EntityType::Character).with_field("name", json!(name))
    }

    #[test]
    fn test_store_writes_initial_version() {
        let memory = facade();
        let id = memory.store(character("Mira")).unwrap();
        let history = memory.history(&id, 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].version, 1);
    }

    #[test]
    fn test_store_rejects_empty_session() {
        let memory = facade();
        let err = memory
            .store(Entity::new(" ", EntityType::Object))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_update_missing_or_empty_is_false() {
        let memory = facade();
        let id = memory.store(character("Mira")).unwrap();
        assert!(!memory.update(&id, EntityUpdate::new()).unwrap());
        assert!(
            !memory
                .update(&EntityId::new("nope"), EntityUpdate::new().set("x", json!(1)))
                .unwrap()
        );
    }

    #[test]
    fn test_rollback_appends_new_version() {
        let memory = facade();
        let id = memory
            .store(character("Mira").with_field("status", json!("alive")))
            .unwrap();
        memory
            .update(&id, EntityUpdate::new().set("status", json!("dead")).set("cause", json!("fall")))
            .unwrap();

        let rolled = memory.rollback(&id, 1).unwrap();
        assert_eq!(rolled.version, 3);
        assert_eq!(rolled.content["status"], json!("alive"));
        assert!(!rolled.content.contains_key("cause"));

        let history = memory.history(&id, 10).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].changed_fields, vec!["cause", "status"]);
        assert!(matches!(memory.rollback(&id, 9), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_tombstone_hides_and_restore_reindexes() {
        let memory = facade();
        let id = memory.store(character("Mira")).unwrap();
        assert!(memory.tombstone(&id).unwrap());
        assert!(memory.retrieve(&id).unwrap().is_none());
        assert!(
            memory
                .semantic_search("Mira", &VectorFilter::new(), 5)
                .unwrap()
                .is_empty()
        );

        assert!(memory.restore(&id).unwrap());
        let hits = memory.semantic_search("Mira", &VectorFilter::new(), 5).unwrap();
        assert_eq!(hits[0].id, id);
        assert!(!memory.tombstone(&EntityId::new("nope")).unwrap());
    }

    #[test]
    fn test_delete_erases_history_tombstone_keeps_it() {
        let memory = facade();
        let kept = memory.store(character("Mira")).unwrap();
        let gone = memory.store(character("Oren")).unwrap();
        memory
            .update(&kept, EntityUpdate::new().set("status", json!("exiled")))
            .unwrap();

        assert!(memory.tombstone(&kept).unwrap());
        assert_eq!(memory.history(&kept, 10).unwrap().len(), 2);

        assert!(memory.delete(&gone).unwrap());
        assert!(memory.history(&gone, 10).unwrap().is_empty());
    }

    #[test]
    fn test_network_respects_depth_and_cycles() {
        let memory = facade();
        let ids: Vec<EntityId> = ["a", "b", "c", "d"]
            .iter()
            .map(|n| memory.store(character(n)).unwrap())
            .collect();
        for pair in ids.windows(2) {
            memory
                .add_relation(&Relation::new(pair[0].clone(), pair[1].clone(), RelationType::Knows))
                .unwrap();
        }
        // Cycle back to the root.
        memory
            .add_relation(&Relation::new(ids[3].clone(), ids[0].clone(), RelationType::Knows))
            .unwrap();

        let one = memory.get_relationship_network(&ids[0], 1).unwrap();
        assert_eq!(one.node_count(), 3);
        assert_eq!(one.nodes[&ids[1]].depth, 1);

        let capped = memory.get_relationship_network(&ids[0], 99).unwrap();
        assert_eq!(capped.node_count(), 4);
        assert_eq!(capped.edges.len(), 4);
        assert!(matches!(
            memory.get_relationship_network(&EntityId::new("nope"), 1),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_check_session_records_issues() {
        let memory = facade();
        let a = memory.store(character("Mira")).unwrap();
        memory
            .add_relation(&Relation::new(a, EntityId::new("ghost"), RelationType::Knows))
            .unwrap();
        let issues = memory.check_session("s1").unwrap();
        assert!(
            issues
                .iter()
                .any(|i| i.issue_type == IssueType::RelationshipInconsistency)
        );
        assert_eq!(memory.stats(Some("s1")).unwrap().open_issues, issues.len());
        assert!(memory.resolve_issue(&issues[0].issue_id));
        assert_eq!(memory.issues().unresolved_count(), issues.len() - 1);
    }

    /// Vector backend whose writes and searches can be switched off.
    struct Unreachable {
        upsert_down: AtomicBool,
        search_down: AtomicBool,
    }

    impl VectorBackend for Unreachable {
        fn name(&self) -> &'static str {
            "unreachable"
        }

        fn dimensions(&self) -> usize {
            16
        }

        fn upsert(&self, _: &EntityId, _: &[f32], _: &VectorMetadata) -> Result<()> {
            if self.upsert_down.load(Ordering::SeqCst) {
                Err(Error::retrieval("upsert", "connection refused"))
            } else {
                Ok(())
            }
        }

        fn remove(&self, _: &EntityId) -> Result<bool> {
            Ok(false)
        }

        fn search(&self, _: &[f32], _: &VectorFilter, _: usize) -> Result<Vec<(EntityId, f32)>> {
            if self.search_down.load(Ordering::SeqCst) {
                Err(Error::retrieval("search", "timeout"))
            } else {
                Ok(Vec::new())
            }
        }

        fn count(&self) -> Result<usize> {
            Ok(0)
        }

        fn clear(&self) -> Result<()> {
            Ok(())
        }
    }

    fn with_backend(backend: Arc<Unreachable>) -> MemoryFacade {
        let vector = VectorIndex::new(backend, Arc::new(HashEmbedder::with_dimensions(16))).unwrap();
        MemoryFacade::new(
            Arc::new(InMemoryEntityStore::new()),
            Some(vector),
            &MemoryConfig::in_memory(),
        )
    }

    #[test]
    fn test_failed_vector_search_degrades_to_keywords() {
        let backend = Arc::new(Unreachable {
            upsert_down: AtomicBool::new(false),
            search_down: AtomicBool::new(true),
        });
        let memory = with_backend(backend);
        let mira = memory.store(character("Mira")).unwrap();
        memory.store(character("Oren")).unwrap();

        let hits = memory.semantic_search("mira", &VectorFilter::new(), 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, mira);

        let hybrid = memory
            .hybrid_search("Mira", &EntityQuery::new().in_session("s1"), 5)
            .unwrap();
        assert_eq!(hybrid.len(), 1);
        assert_eq!(hybrid[0].id, mira);
    }

    #[test]
    fn test_index_failure_surfaces_after_durable_store() {
        let backend = Arc::new(Unreachable {
            upsert_down: AtomicBool::new(true),
            search_down: AtomicBool::new(false),
        });
        let memory = with_backend(Arc::clone(&backend));
        let entity = character("Mira");
        let id = entity.id.clone();

        let err = memory.store(entity).unwrap_err();
        assert!(err.is_retrieval());
        // The write landed; only the index is behind.
        assert_eq!(memory.retrieve(&id).unwrap().unwrap().id, id);
        assert_eq!(memory.history(&id, 10).unwrap().len(), 1);

        backend.upsert_down.store(false, Ordering::SeqCst);
        assert_eq!(memory.reindex(Some("s1")).unwrap(), 1);
    }

    #[test]
    fn test_default_config_summarizes_with_template() {
        let memory = facade();
        let now = crate::now();
        for day in 0..10 {
            let created = now - chrono::Duration::days(day) - chrono::Duration::hours(12);
            memory
                .store(
                    Entity::new("s1", EntityType::Fact)
                        .with_field("name", json!(format!("fact {day}")))
                        .with_created_at(created),
                )
                .unwrap();
        }

        let summary = memory.summarize("s1", None).unwrap().expect("template summary");
        assert!(summary.is_template());
        assert!(!summary.original_entity_ids.is_empty());
        assert_eq!(memory.get_summaries("s1", 5).unwrap().len(), 1);
    }

    #[test]
    fn test_stats_counts() {
        let memory = facade();
        memory.store(character("Mira")).unwrap();
        memory
            .store(Entity::new("s1", EntityType::Location).with_field("name", json!("Harbor")))
            .unwrap();
        let stats = memory.stats(None).unwrap();
        assert_eq!(stats.total_entities, 2);
        assert_eq!(stats.entities_by_type[&EntityType::Location], 1);
        assert_eq!(stats.vector_points, Some(2));
    }
}
