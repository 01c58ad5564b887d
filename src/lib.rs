//! # World Memory
//!
//! Persistent world-knowledge memory engine for long-running interactive
//! narrative sessions.
//!
//! The engine stores characters, locations, facts, events, plotlines and the
//! relations between them, and keeps them searchable, compact and consistent
//! as a story grows without bound.
//!
//! ## Features
//!
//! - Durable structured store (`SQLite`) with an append-only version history
//! - Write-through LRU cache in front of the store
//! - Pluggable semantic vector index (in-memory, Redis, pgvector)
//! - Multi-strategy summarization with an LLM or deterministic template backend
//! - Batch consistency checking (duplicates, temporal and logical conflicts,
//!   dangling relations)
//!
//! ## Example
//!
//! ```rust,ignore
//! use world_memory::{Entity, EntityType, MemoryConfig, MemoryFacade};
//! use serde_json::json;
//!
//! let memory = MemoryFacade::from_config(&MemoryConfig::in_memory())?;
//! let id = memory.store(Entity::new("session-1", EntityType::Character)
//!     .with_field("name", json!("Mira"))
//!     .with_field("status", json!("alive")))?;
//! let mira = memory.retrieve(&id)?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use chrono::{DateTime, Utc};
use thiserror::Error as ThisError;

// Module declarations
pub mod cache;
pub mod config;
pub mod embedding;
pub mod llm;
pub mod models;
pub mod observability;
pub mod services;
pub mod storage;

// Re-exports for convenience
pub use cache::{CacheLayer, CacheStats};
pub use config::{FeatureFlags, MemoryConfig};
pub use embedding::Embedder;
pub use llm::LlmProvider;
pub use models::{
    ConsistencyIssue, Entity, EntityId, EntityQuery, EntityType, EntityUpdate, EntityVersion,
    IssueSeverity, IssueType, MemorySummary, Relation, RelationType, SummaryFormat,
};
pub use services::{ConsistencyChecker, IssueRegistry, MemoryFacade, Summarizer, VectorIndex};
pub use storage::{EntityStore, VectorBackend};

/// Error type for world memory operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `Storage` | Durable read/write against the structured store fails |
/// | `Retrieval` | Vector search or embedding backend fails |
/// | `Consistency` | A caller asked for detected issues to be treated as fatal |
/// | `Generation` | The text-generation backend fails (absorbed by the summarizer) |
/// | `InvalidInput` | Malformed ids, dimension mismatches, bad config values |
/// | `NotFound` | An operation needs an entity that does not exist |
/// | `FeatureNotEnabled` | A backend was requested that was not compiled in |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Durable-write or read failure in the structured store.
    #[error("storage operation '{operation}' failed: {cause}")]
    Storage {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// Search or embedding backend failure.
    #[error("retrieval operation '{operation}' failed: {cause}")]
    Retrieval {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// Detected consistency issues escalated by the caller.
    ///
    /// The consistency checker never raises this itself; see
    /// [`services::ensure_consistent`].
    #[error("consistency violated ({issues} issue(s)): {summary}")]
    Consistency {
        /// Number of issues at or above the requested severity.
        issues: usize,
        /// Human-readable summary of the issues.
        summary: String,
    },

    /// Text-generation backend failure.
    #[error("generation '{operation}' failed: {cause}")]
    Generation {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A required entity or record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Feature not enabled (requires feature flag).
    #[error("feature not enabled: {0} (compile with --features {0})")]
    FeatureNotEnabled(String),
}

impl Error {
    /// Builds a [`Error::Storage`] from an operation name and any displayable cause.
    pub fn storage(operation: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::Storage {
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }

    /// Builds a [`Error::Retrieval`] from an operation name and any displayable cause.
    pub fn retrieval(operation: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::Retrieval {
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }

    /// Builds a [`Error::Generation`] from an operation name and any displayable cause.
    pub fn generation(operation: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::Generation {
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }

    /// Returns true for structured-store failures.
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage { .. })
    }

    /// Returns true for search/embedding failures, which callers may degrade from.
    #[must_use]
    pub const fn is_retrieval(&self) -> bool {
        matches!(self, Self::Retrieval { .. })
    }
}

/// Result type alias for world memory operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current time truncated to millisecond precision.
///
/// Timestamps are persisted as epoch milliseconds, so every timestamp the
/// engine creates goes through this function to keep stored and in-memory
/// values equal.
#[must_use]
pub fn now() -> DateTime<Utc> {
    from_millis(Utc::now().timestamp_millis())
}

/// Converts epoch milliseconds into a UTC timestamp, clamping out-of-range values to the epoch.
#[must_use]
pub fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidInput("test error".to_string());
        assert_eq!(err.to_string(), "invalid input: test error");

        let err = Error::storage("store_entity", "disk full");
        assert_eq!(
            err.to_string(),
            "storage operation 'store_entity' failed: disk full"
        );
        assert!(err.is_storage());
        assert!(!err.is_retrieval());

        let err = Error::retrieval("vector_search", "connection refused");
        assert!(err.is_retrieval());

        let err = Error::Consistency {
            issues: 2,
            summary: "dangling relation".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "consistency violated (2 issue(s)): dangling relation"
        );
    }

    #[test]
    fn test_now_is_millisecond_precise() {
        let ts = now();
        assert_eq!(from_millis(ts.timestamp_millis()), ts);
    }
}
