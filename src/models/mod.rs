//! Data models for the world memory engine.
//!
//! This module contains all the core data structures used throughout the system.

mod consistency;
mod entity;
mod fact;
pub mod graph;
mod query;
mod relation;
mod summary;
mod version;

pub use consistency::{ConsistencyIssue, IssueSeverity, IssueType};
pub use entity::{Entity, EntityId, EntityType, EntityUpdate, value_text};
pub use fact::{EntityAssociation, Fact, Plotline, PlotlineStatus, PlotlineUpdate};
pub use graph::{
    Edge, ImportStats, MemoryStats, NetworkNode, RelationshipNetwork, SNAPSHOT_FORMAT_VERSION,
    SnapshotEntity, TimelineEntry, WorldSnapshot,
};
pub use query::EntityQuery;
pub use relation::{Relation, RelationType};
pub use summary::{CoveragePeriod, GeneratedBy, MemorySummary, SummaryFormat, SummaryStrategy};
pub use version::EntityVersion;
