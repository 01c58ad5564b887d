//! Structured entity store implementations.

mod memory;
mod sqlite;

pub use memory::InMemoryEntityStore;
pub use sqlite::SqliteEntityStore;
