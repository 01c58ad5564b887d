//! In-memory brute-force vector backend.
//!
//! Scores every stored point on each search. Intended for tests and worlds
//! small enough that a linear scan is cheaper than running a service.

use crate::models::EntityId;
use crate::storage::traits::{VectorBackend, VectorFilter, VectorMetadata};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::RwLock;

type Point = (Vec<f32>, VectorMetadata);

/// Brute-force cosine similarity backend.
pub struct InMemoryVectorBackend {
    dimensions: usize,
    points: RwLock<HashMap<EntityId, Point>>,
}

impl InMemoryVectorBackend {
    /// Creates an empty backend for `dimensions`-long embeddings.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            points: RwLock::new(HashMap::new()),
        }
    }

    fn validate_embedding(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.dimensions {
            return Err(Error::InvalidInput(format!(
                "embedding dimension mismatch: expected {}, got {}",
                self.dimensions,
                embedding.len()
            )));
        }
        Ok(())
    }

    fn lock_error(e: impl std::fmt::Display) -> Error {
        Error::retrieval("memory_vector_lock", e)
    }
}

/// Cosine similarity mapped from `[-1, 1]` onto `[0, 1]`.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    f32::midpoint(dot / (norm_a * norm_b), 1.0).clamp(0.0, 1.0)
}

impl VectorBackend for InMemoryVectorBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn upsert(&self, id: &EntityId, embedding: &[f32], metadata: &VectorMetadata) -> Result<()> {
        self.validate_embedding(embedding)?;
        self.points
            .write()
            .map_err(Self::lock_error)?
            .insert(id.clone(), (embedding.to_vec(), metadata.clone()));
        Ok(())
    }

    fn remove(&self, id: &EntityId) -> Result<bool> {
        Ok(self
            .points
            .write()
            .map_err(Self::lock_error)?
            .remove(id)
            .is_some())
    }

    fn search(
        &self,
        query_embedding: &[f32],
        filter: &VectorFilter,
        limit: usize,
    ) -> Result<Vec<(EntityId, f32)>> {
        self.validate_embedding(query_embedding)?;
        let points = self.points.read().map_err(Self::lock_error)?;

        let mut scored: Vec<(EntityId, f32)> = points
            .iter()
            .filter(|(_, (_, meta))| filter.accepts(meta))
            .map(|(id, (embedding, _))| (id.clone(), cosine_similarity(query_embedding, embedding)))
            .filter(|(_, score)| filter.accepts_score(*score))
            .collect();
        drop(points);

        // Ties broken by id so results are stable across runs.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(limit);
        Ok(scored)
    }

    fn count(&self) -> Result<usize> {
        Ok(self.points.read().map_err(Self::lock_error)?.len())
    }

    fn clear(&self) -> Result<()> {
        self.points.write().map_err(Self::lock_error)?.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityType;

    fn meta(session: &str, entity_type: EntityType) -> VectorMetadata {
        VectorMetadata {
            session_id: session.to_string(),
            entity_type,
            created_at: crate::now(),
        }
    }

    #[test]
    fn test_search_ranks_descending() {
        let backend = InMemoryVectorBackend::new(3);
        let m = meta("s", EntityType::Character);
        backend.upsert(&EntityId::new("near"), &[1.0, 0.1, 0.0], &m).unwrap();
        backend.upsert(&EntityId::new("far"), &[-1.0, 0.0, 0.0], &m).unwrap();
        backend.upsert(&EntityId::new("mid"), &[0.0, 1.0, 0.0], &m).unwrap();

        let results = backend.search(&[1.0, 0.0, 0.0], &VectorFilter::new(), 10).unwrap();
        let ids: Vec<&str> = results.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid", "far"]);
        assert!(results.windows(2).all(|w| w[0].1 >= w[1].1));
    }

    #[test]
    fn test_filter_and_limit() {
        let backend = InMemoryVectorBackend::new(2);
        backend
            .upsert(&EntityId::new("a"), &[1.0, 0.0], &meta("s1", EntityType::Character))
            .unwrap();
        backend
            .upsert(&EntityId::new("b"), &[1.0, 0.0], &meta("s2", EntityType::Character))
            .unwrap();
        backend
            .upsert(&EntityId::new("c"), &[1.0, 0.0], &meta("s1", EntityType::Location))
            .unwrap();

        let filter = VectorFilter::new()
            .with_session("s1")
            .with_type(EntityType::Character);
        let results = backend.search(&[1.0, 0.0], &filter, 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.as_str(), "a");

        let limited = backend.search(&[1.0, 0.0], &VectorFilter::new(), 2).unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn test_dimension_mismatch() {
        let backend = InMemoryVectorBackend::new(4);
        let err = backend
            .upsert(&EntityId::new("a"), &[1.0], &meta("s", EntityType::Event))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(backend.search(&[1.0], &VectorFilter::new(), 1).is_err());
    }

    #[test]
    fn test_remove_and_clear() {
        let backend = InMemoryVectorBackend::new(2);
        let m = meta("s", EntityType::Object);
        backend.upsert(&EntityId::new("a"), &[0.0, 1.0], &m).unwrap();
        backend.upsert(&EntityId::new("b"), &[1.0, 0.0], &m).unwrap();
        assert!(backend.remove(&EntityId::new("a")).unwrap());
        assert!(!backend.remove(&EntityId::new("a")).unwrap());
        assert_eq!(backend.count().unwrap(), 1);
        backend.clear().unwrap();
        assert_eq!(backend.count().unwrap(), 0);
    }

    #[test]
    fn test_cosine_bounds() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]).abs() < 1e-6);
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).abs() < f32::EPSILON);
    }
}
