//! Vector backend implementations.

mod memory;
mod pgvector;
mod redis;

pub use memory::InMemoryVectorBackend;
pub use pgvector::PgvectorBackend;
pub use redis::RedisVectorBackend;
