//! Append-only entity version history.

use super::{Entity, EntityId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One row of an entity's audit log.
///
/// Unique per `(entity_id, version)` and never mutated after it is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityVersion {
    /// Entity the snapshot belongs to.
    pub entity_id: EntityId,
    /// Version number the snapshot captures.
    pub version: u32,
    /// Full content as of this version.
    pub content_snapshot: Map<String, Value>,
    /// Top-level content fields changed relative to the previous version.
    pub changed_fields: Vec<String>,
    /// Who made the change.
    pub changed_by: Option<String>,
    /// Why the change was made.
    pub reason: Option<String>,
    /// When the version was recorded.
    pub created_at: DateTime<Utc>,
}

impl EntityVersion {
    /// Captures the current state of `entity` as a version row.
    #[must_use]
    pub fn capture(entity: &Entity, changed_fields: Vec<String>) -> Self {
        Self {
            entity_id: entity.id.clone(),
            version: entity.version,
            content_snapshot: entity.content.clone(),
            changed_fields,
            changed_by: None,
            reason: None,
            created_at: entity.updated_at,
        }
    }

    /// Version row written when an entity is first stored.
    #[must_use]
    pub fn initial(entity: &Entity) -> Self {
        let mut fields: Vec<String> = entity.content.keys().cloned().collect();
        fields.sort();
        Self::capture(entity, fields).with_reason("created")
    }

    /// Sets the author.
    #[must_use]
    pub fn with_changed_by(mut self, changed_by: Option<String>) -> Self {
        self.changed_by = changed_by;
        self
    }

    /// Sets the reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}
