//! Shared `SQLite` infrastructure for storage backends.
//!
//! - [`connection`]: connection opening, configuration, and poison-recovering locks
//! - [`sql`]: SQL helpers (LIKE escaping, placeholders, JSON columns)
//! - [`metrics`]: shared metrics recording

mod connection;
mod metrics;
mod sql;

pub use connection::{acquire_lock, configure_connection, open_connection};
pub use metrics::record_operation_metrics;
pub use sql::{escape_like_wildcards, from_json, placeholders, to_json, to_millis};
