//! Storage backend traits.

mod entity;
mod vector;

pub use entity::EntityStore;
pub use vector::{VectorBackend, VectorFilter, VectorMetadata, distance_to_similarity};
