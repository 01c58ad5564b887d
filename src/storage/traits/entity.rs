//! Structured entity store trait.
//!
//! The entity store is the authoritative, durable home of every entity,
//! relation, fact, plotline, version row, and persisted summary.
//!
//! # Available Implementations
//!
//! | Backend | Use Case |
//! |---------|----------|
//! | `SqliteEntityStore` | Default, single-file durable storage |
//! | `InMemoryEntityStore` | Tests and ephemeral sessions |
//! | `CacheLayer` | Write-through LRU decorator over any of the above |

use crate::Result;
use crate::models::{
    Entity, EntityId, EntityQuery, EntityType, EntityVersion, Fact, MemorySummary, Plotline,
    PlotlineStatus, PlotlineUpdate, Relation, RelationType,
};
use std::collections::HashMap;

/// Trait for structured entity storage.
///
/// # Implementor Notes
///
/// - Methods use `&self` to enable sharing via `Arc<dyn EntityStore>`
/// - Use interior mutability (e.g., `Mutex<Connection>`) for mutable state
/// - Every write must be durable before the call returns
/// - Queries that match nothing return an empty `Vec`, never an error
/// - Relation endpoints are not checked for existence
pub trait EntityStore: Send + Sync {
    /// Returns the backend name for logging and metrics.
    fn name(&self) -> &'static str;

    // ========================================================================
    // Entities
    // ========================================================================

    /// Inserts or replaces an entity, marking it active.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Storage`] if the write fails.
    fn store(&self, entity: &Entity) -> Result<EntityId>;

    /// Retrieves an active entity by ID.
    ///
    /// Tombstoned entities are reported as absent.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Storage`] if the read fails.
    fn retrieve(&self, id: &EntityId) -> Result<Option<Entity>>;

    /// Returns up to `limit` active entities of one type in a session, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Storage`] if the read fails.
    fn query_by_type(
        &self,
        session_id: &str,
        entity_type: EntityType,
        limit: usize,
    ) -> Result<Vec<Entity>> {
        self.query(
            &EntityQuery::new()
                .in_session(session_id)
                .of_type(entity_type)
                .with_limit(limit),
        )
    }

    /// Returns entities matching `query`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Storage`] if the read fails.
    fn query(&self, query: &EntityQuery) -> Result<Vec<Entity>>;

    /// Physically deletes an entity, its incident relations, its fact and
    /// plotline associations, and its version history.
    ///
    /// Version rows are append-only for as long as the entity exists; a hard
    /// delete is the one operation that erases them. Use [`Self::set_active`]
    /// to hide an entity while keeping its audit trail.
    ///
    /// Returns `false` if the entity did not exist.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Storage`] if the delete fails.
    fn delete(&self, id: &EntityId) -> Result<bool>;

    /// Sets the tombstone flag. Returns `false` if the entity does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Storage`] if the write fails.
    fn set_active(&self, id: &EntityId, active: bool) -> Result<bool>;

    /// Returns the number of active entities per type, optionally within one session.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Storage`] if the read fails.
    fn count_by_type(&self, session_id: Option<&str>) -> Result<HashMap<EntityType, usize>>;

    // ========================================================================
    // Relations
    // ========================================================================

    /// Inserts or replaces a relation keyed by `(source, target, type)`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Storage`] if the write fails.
    fn add_relation(&self, relation: &Relation) -> Result<()>;

    /// Removes a relation. Returns `false` if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Storage`] if the delete fails.
    fn remove_relation(
        &self,
        source_id: &EntityId,
        target_id: &EntityId,
        relation_type: RelationType,
    ) -> Result<bool>;

    /// Returns relations where `id` is the source or the target, optionally of one type.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Storage`] if the read fails.
    fn get_related(
        &self,
        id: &EntityId,
        relation_type: Option<RelationType>,
    ) -> Result<Vec<Relation>>;

    /// Returns all relations, or those with an endpoint in `session_id`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Storage`] if the read fails.
    fn list_relations(&self, session_id: Option<&str>) -> Result<Vec<Relation>>;

    // ========================================================================
    // Facts and plotlines
    // ========================================================================

    /// Inserts or replaces a fact and its entity associations.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Storage`] if the write fails.
    fn store_fact(&self, fact: &Fact) -> Result<()>;

    /// Returns up to `limit` facts in a session, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Storage`] if the read fails.
    fn get_facts(&self, session_id: &str, limit: usize) -> Result<Vec<Fact>>;

    /// Returns facts that reference `id` as source, target, or association.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Storage`] if the read fails.
    fn get_facts_for_entity(&self, id: &EntityId) -> Result<Vec<Fact>>;

    /// Inserts or replaces a plotline and its entity associations.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Storage`] if the write fails.
    fn create_plotline(&self, plotline: &Plotline) -> Result<()>;

    /// Retrieves a plotline by ID.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Storage`] if the read fails.
    fn get_plotline(&self, id: &str) -> Result<Option<Plotline>>;

    /// Returns plotlines in a session, highest priority first, optionally by status.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Storage`] if the read fails.
    fn get_plotlines(
        &self,
        session_id: &str,
        status: Option<PlotlineStatus>,
    ) -> Result<Vec<Plotline>>;

    /// Applies a partial update. Returns the updated plotline, or `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Storage`] if the read or write fails.
    fn update_plotline(&self, id: &str, update: PlotlineUpdate) -> Result<Option<Plotline>> {
        let Some(mut plotline) = self.get_plotline(id)? else {
            return Ok(None);
        };
        update.apply_to(&mut plotline);
        self.create_plotline(&plotline)?;
        Ok(Some(plotline))
    }

    // ========================================================================
    // Versions and summaries
    // ========================================================================

    /// Appends a version row.
    ///
    /// Returns `false`, leaving the existing row untouched, if a row for
    /// `(entity_id, version)` already exists.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Storage`] if the write fails.
    fn save_version(&self, version: &EntityVersion) -> Result<bool>;

    /// Returns up to `limit` version rows for an entity, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Storage`] if the read fails.
    fn get_versions(&self, id: &EntityId, limit: usize) -> Result<Vec<EntityVersion>>;

    /// Persists a summary.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Storage`] if the write fails.
    fn store_summary(&self, summary: &MemorySummary) -> Result<()>;

    /// Returns up to `limit` summaries in a session, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Storage`] if the read fails.
    fn get_summaries(&self, session_id: &str, limit: usize) -> Result<Vec<MemorySummary>>;
}
