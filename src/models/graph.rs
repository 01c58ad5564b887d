//! Derived read models: timelines and relationship networks.

use super::{Entity, EntityId, EntityType, Fact, MemorySummary, Plotline, Relation, RelationType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One row of a session timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    /// When the entity was created.
    pub timestamp: DateTime<Utc>,
    /// The entity.
    pub entity_id: EntityId,
    /// Its type.
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    /// One-line content summary.
    pub content_summary: String,
    /// Importance score in `[0, 1]`.
    pub importance: f64,
}

/// A node in a relationship network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkNode {
    /// Entity type.
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    /// Display name.
    pub name: String,
    /// Hop distance from the root.
    pub depth: usize,
}

/// A directed edge in a relationship network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Source entity.
    pub source: EntityId,
    /// Target entity.
    pub target: EntityId,
    /// Relation type.
    pub relation_type: RelationType,
    /// Relation strength.
    pub strength: f64,
}

impl From<&Relation> for Edge {
    fn from(r: &Relation) -> Self {
        Self {
            source: r.source_id.clone(),
            target: r.target_id.clone(),
            relation_type: r.relation_type,
            strength: r.strength,
        }
    }
}

/// The neighbourhood of an entity up to some depth.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationshipNetwork {
    /// Root of the traversal.
    pub root: Option<EntityId>,
    /// Every reached entity.
    pub nodes: HashMap<EntityId, NetworkNode>,
    /// Every traversed edge, each listed once.
    pub edges: Vec<Edge>,
}

impl RelationshipNetwork {
    /// Number of reached entities.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if `id` was reached.
    #[must_use]
    pub fn contains(&self, id: &EntityId) -> bool {
        self.nodes.contains_key(id)
    }
}

/// Portable dump of a world, used for export and import.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// Format version of the dump.
    pub format_version: u32,
    /// When the dump was taken.
    pub exported_at: Option<DateTime<Utc>>,
    /// Session filter used, if any.
    pub session_id: Option<String>,
    /// Entities, including tombstoned ones.
    pub entities: Vec<SnapshotEntity>,
    /// Relations touching exported entities.
    pub relations: Vec<Relation>,
    /// Facts.
    #[serde(default)]
    pub facts: Vec<Fact>,
    /// Plotlines.
    #[serde(default)]
    pub plotlines: Vec<Plotline>,
    /// Persisted summaries.
    #[serde(default)]
    pub summaries: Vec<MemorySummary>,
}

/// Current snapshot dump format.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// An exported entity with its tombstone state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntity {
    /// The entity.
    #[serde(flatten)]
    pub entity: Entity,
    /// False if tombstoned.
    #[serde(default = "default_active")]
    pub is_active: bool,
}

const fn default_active() -> bool {
    true
}

/// Counts from an import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportStats {
    /// Entities written.
    pub entities: usize,
    /// Relations written.
    pub relations: usize,
    /// Facts written.
    pub facts: usize,
    /// Plotlines written.
    pub plotlines: usize,
    /// Summaries written.
    pub summaries: usize,
    /// Entities indexed for semantic search.
    pub indexed: usize,
}

/// Point-in-time engine diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    /// Active entities per type.
    pub entities_by_type: HashMap<EntityType, usize>,
    /// Active entities in total.
    pub total_entities: usize,
    /// Stored relations.
    pub relations: usize,
    /// Points in the semantic index, if enabled.
    pub vector_points: Option<usize>,
    /// Cache hits since construction.
    pub cache_hits: u64,
    /// Cache misses since construction.
    pub cache_misses: u64,
    /// `hits / (hits + misses)`, or 0 with no traffic.
    pub cache_hit_rate: f64,
    /// Unresolved consistency issues in the registry.
    pub open_issues: usize,
}
