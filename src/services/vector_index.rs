//! Semantic index service.
//!
//! Glues an [`Embedder`] to a [`VectorBackend`]: entities are flattened to
//! text, embedded, and upserted with filterable metadata.

use crate::embedding::Embedder;
use crate::models::{Entity, EntityId};
use crate::storage::{VectorBackend, VectorFilter, VectorMetadata};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// Embedding-backed similarity index over entities.
#[derive(Clone)]
pub struct VectorIndex {
    backend: Arc<dyn VectorBackend>,
    embedder: Arc<dyn Embedder>,
}

impl VectorIndex {
    /// Creates an index from a backend and an embedder of matching width.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the dimensions differ.
    pub fn new(backend: Arc<dyn VectorBackend>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        if backend.dimensions() != embedder.dimensions() {
            return Err(Error::InvalidInput(format!(
                "embedder produces {} dimensions but the {} backend expects {}",
                embedder.dimensions(),
                backend.name(),
                backend.dimensions()
            )));
        }
        Ok(Self { backend, embedder })
    }

    /// Returns the backend name.
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Embeds text.
    ///
    /// # Errors
    ///
    /// Propagates embedder failures.
    pub fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embedder.embed(text)
    }

    /// Stores a raw vector for an id.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub fn upsert(&self, id: &EntityId, vector: &[f32], metadata: &VectorMetadata) -> Result<()> {
        self.backend.upsert(id, vector, metadata)
    }

    /// Embeds and upserts an entity.
    ///
    /// # Errors
    ///
    /// Propagates embedder or backend failures.
    #[instrument(skip(self, entity), fields(operation = "index_entity", entity_id = %entity.id))]
    pub fn index_entity(&self, entity: &Entity) -> Result<()> {
        let vector = self.embed(&entity.searchable_text())?;
        self.backend
            .upsert(&entity.id, &vector, &VectorMetadata::from(entity))
    }

    /// Searches by free text, returning ids ranked by descending similarity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Retrieval`] if embedding or search fails.
    #[instrument(skip(self, filter), fields(operation = "vector_search", backend = self.backend.name()))]
    pub fn search_text(
        &self,
        query: &str,
        filter: &VectorFilter,
        limit: usize,
    ) -> Result<Vec<(EntityId, f32)>> {
        let vector = self.embed(query)?;
        self.search_vector(&vector, filter, limit)
    }

    /// Searches by vector.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub fn search_vector(
        &self,
        vector: &[f32],
        filter: &VectorFilter,
        limit: usize,
    ) -> Result<Vec<(EntityId, f32)>> {
        let start = Instant::now();
        let result = self.backend.search(vector, filter, limit);
        metrics::histogram!(
            "vector_search_duration_ms",
            "backend" => self.backend.name(),
            "status" => if result.is_ok() { "success" } else { "error" }
        )
        .record(start.elapsed().as_secs_f64() * 1000.0);
        result
    }

    /// Removes an id. Returns `false` if it was not indexed.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub fn remove(&self, id: &EntityId) -> Result<bool> {
        self.backend.remove(id)
    }

    /// Number of indexed points.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub fn count(&self) -> Result<usize> {
        self.backend.count()
    }

    /// Drops every point.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub fn clear(&self) -> Result<()> {
        self.backend.clear()
    }
}
