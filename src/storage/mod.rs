//! Storage layer abstraction.
//!
//! This module provides a two-layer storage architecture:
//! - **Entity store**: Authoritative structured storage (`SQLite`, in-memory)
//! - **Vector**: Embedding similarity search (in-memory, Redis, pgvector)
//!
//! The two layers are independently consistent. Nothing here makes a write
//! to both atomic.

// Allow cast precision loss for score calculations where exact precision is not critical.
#![allow(clippy::cast_precision_loss)]
// Allow significant_drop_tightening - dropping database connections slightly early
// provides no meaningful benefit.
#![allow(clippy::significant_drop_tightening)]
// Allow match_same_arms for explicit enum handling.
#![allow(clippy::match_same_arms)]
// Allow or_fun_call - the error path is uncommon.
#![allow(clippy::or_fun_call)]

pub mod entity;
pub mod resilience;
pub mod sqlite;
pub mod traits;
pub mod vector;

pub use entity::{InMemoryEntityStore, SqliteEntityStore};
pub use resilience::{ResilienceConfig, ResilientVectorBackend};
pub use traits::{EntityStore, VectorBackend, VectorFilter, VectorMetadata, distance_to_similarity};
pub use vector::{InMemoryVectorBackend, PgvectorBackend, RedisVectorBackend};
