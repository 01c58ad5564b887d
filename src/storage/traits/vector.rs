//! Vector backend trait.
//!
//! Provides the abstraction layer for semantic similarity search backends.
//!
//! # Available Implementations
//!
//! | Backend | Use Case | Configuration |
//! |---------|----------|---------------|
//! | `InMemoryVectorBackend` | Tests, small worlds | Default, no external deps |
//! | `RedisVectorBackend` | Redis Stack HNSW index | Requires the `redis` feature |
//! | `PgvectorBackend` | PostgreSQL with pgvector | Requires the `postgres` feature |
//!
//! # Similarity
//!
//! Every backend reports similarity in `[0, 1]`, higher is closer. Backends
//! whose engine returns a distance convert with `1 / (1 + distance)`.

use crate::Result;
use crate::models::{Entity, EntityId, EntityType};
use chrono::{DateTime, Utc};

/// Metadata stored next to each embedding and used for filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorMetadata {
    /// Owning session.
    pub session_id: String,
    /// Entity type.
    pub entity_type: EntityType,
    /// Entity creation time.
    pub created_at: DateTime<Utc>,
}

impl From<&Entity> for VectorMetadata {
    fn from(entity: &Entity) -> Self {
        Self {
            session_id: entity.session_id.clone(),
            entity_type: entity.entity_type,
            created_at: entity.created_at,
        }
    }
}

/// Filter criteria for vector similarity search.
///
/// # Example
///
/// ```rust
/// use world_memory::storage::VectorFilter;
/// use world_memory::EntityType;
///
/// let filter = VectorFilter::new()
///     .with_session("session-1")
///     .with_type(EntityType::Character)
///     .with_min_score(0.3);
/// assert!(!filter.is_empty());
/// ```
#[derive(Debug, Clone, Default)]
pub struct VectorFilter {
    /// Restrict to one session.
    pub session_id: Option<String>,
    /// Restrict to these types. Empty means any.
    pub entity_types: Vec<EntityType>,
    /// Minimum similarity score (0.0 to 1.0).
    pub min_score: Option<f32>,
}

impl VectorFilter {
    /// Creates an empty filter (matches all).
    #[must_use]
    pub const fn new() -> Self {
        Self {
            session_id: None,
            entity_types: Vec::new(),
            min_score: None,
        }
    }

    /// Restricts to a session.
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Adds a type filter.
    #[must_use]
    pub fn with_type(mut self, entity_type: EntityType) -> Self {
        self.entity_types.push(entity_type);
        self
    }

    /// Sets the minimum score threshold.
    #[must_use]
    pub const fn with_min_score(mut self, score: f32) -> Self {
        self.min_score = Some(score);
        self
    }

    /// Returns true if the filter is empty (matches all).
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.session_id.is_none() && self.entity_types.is_empty() && self.min_score.is_none()
    }

    /// Returns true if `metadata` passes the session and type predicates.
    #[must_use]
    pub fn accepts(&self, metadata: &VectorMetadata) -> bool {
        self.session_id
            .as_ref()
            .is_none_or(|s| s == &metadata.session_id)
            && (self.entity_types.is_empty() || self.entity_types.contains(&metadata.entity_type))
    }

    /// Returns true if `score` clears the minimum threshold.
    #[must_use]
    pub fn accepts_score(&self, score: f32) -> bool {
        self.min_score.is_none_or(|min| score >= min)
    }
}

/// Trait for vector layer backends.
///
/// Vector backends provide similarity search using embedding vectors.
/// Implementations should be thread-safe (`Send + Sync`).
///
/// # Implementor Notes
///
/// - Methods use `&self` to enable sharing via `Arc<dyn VectorBackend>`
/// - Use interior mutability (e.g., `Mutex<HashMap<K,V>>`) for mutable state
/// - Report unavailability as [`crate::Error::Retrieval`]
pub trait VectorBackend: Send + Sync {
    /// Backend name for logging and metrics.
    fn name(&self) -> &'static str;

    /// The dimensionality of embedding vectors.
    fn dimensions(&self) -> usize;

    /// Inserts or updates an embedding for an entity.
    ///
    /// # Errors
    ///
    /// Returns an error if the dimensions do not match or the backend fails.
    fn upsert(&self, id: &EntityId, embedding: &[f32], metadata: &VectorMetadata) -> Result<()>;

    /// Removes an embedding by entity ID. Returns `false` if it was absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal operation fails.
    fn remove(&self, id: &EntityId) -> Result<bool>;

    /// Searches for similar embeddings.
    ///
    /// Returns entity IDs with similarity scores in `[0, 1]`, ordered by
    /// descending similarity.
    ///
    /// # Errors
    ///
    /// Returns an error if the search operation fails.
    fn search(
        &self,
        query_embedding: &[f32],
        filter: &VectorFilter,
        limit: usize,
    ) -> Result<Vec<(EntityId, f32)>>;

    /// Returns the total count of indexed embeddings.
    ///
    /// # Errors
    ///
    /// Returns an error if the count operation fails.
    fn count(&self) -> Result<usize>;

    /// Clears all embeddings.
    ///
    /// # Errors
    ///
    /// Returns an error if the clear operation fails.
    fn clear(&self) -> Result<()>;
}

/// Converts a distance into a similarity in `(0, 1]`.
#[must_use]
pub fn distance_to_similarity(distance: f32) -> f32 {
    1.0 / (1.0 + distance.max(0.0))
}
