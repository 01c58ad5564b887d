//! Facts, plotlines, and their typed entity associations.

// f64::clamp is not const-stable
#![allow(clippy::missing_const_for_fn)]

use super::EntityId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A typed link from a fact or plotline to an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityAssociation {
    /// Associated entity.
    pub entity_id: EntityId,
    /// Role of the entity (e.g. "subject", "witness", "protagonist").
    pub association_type: String,
    /// Relevance in `[0, 1]`.
    pub relevance: f64,
}

impl EntityAssociation {
    /// Creates an association, clamping relevance to `[0, 1]`.
    #[must_use]
    pub fn new(entity_id: EntityId, association_type: impl Into<String>, relevance: f64) -> Self {
        Self {
            entity_id,
            association_type: association_type.into(),
            relevance: if relevance.is_nan() {
                0.0
            } else {
                relevance.clamp(0.0, 1.0)
            },
        }
    }
}

/// An event or causality record used for bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    /// Unique identifier.
    pub id: String,
    /// Owning session.
    pub session_id: String,
    /// Free-form classification ("event", "cause", "rule", ...).
    pub fact_type: String,
    /// Fact payload.
    pub content: Map<String, Value>,
    /// When the fact holds or happened.
    pub timestamp: DateTime<Utc>,
    /// Optional source entity.
    pub source_entity_id: Option<EntityId>,
    /// Optional target entity.
    pub target_entity_id: Option<EntityId>,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Associated entities.
    #[serde(default)]
    pub entity_associations: Vec<EntityAssociation>,
}

impl Fact {
    /// Creates a fact with a generated ID and full confidence.
    #[must_use]
    pub fn new(session_id: impl Into<String>, fact_type: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            session_id: session_id.into(),
            fact_type: fact_type.into(),
            content: Map::new(),
            timestamp: crate::now(),
            source_entity_id: None,
            target_entity_id: None,
            confidence: 1.0,
            metadata: Map::new(),
            entity_associations: Vec::new(),
        }
    }

    /// Sets a content field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.content.insert(key.into(), value);
        self
    }

    /// Sets the source and target entities.
    #[must_use]
    pub fn between(mut self, source: EntityId, target: EntityId) -> Self {
        self.source_entity_id = Some(source);
        self.target_entity_id = Some(target);
        self
    }

    /// Adds an entity association.
    #[must_use]
    pub fn with_association(mut self, association: EntityAssociation) -> Self {
        self.entity_associations.push(association);
        self
    }

    /// Returns every entity this fact refers to, source and target first.
    #[must_use]
    pub fn referenced_entities(&self) -> Vec<&EntityId> {
        let mut ids: Vec<&EntityId> = self
            .source_entity_id
            .iter()
            .chain(self.target_entity_id.iter())
            .collect();
        for assoc in &self.entity_associations {
            if !ids.contains(&&assoc.entity_id) {
                ids.push(&assoc.entity_id);
            }
        }
        ids
    }
}

/// Progress state of a plotline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlotlineStatus {
    /// Currently unfolding.
    #[default]
    Active,
    /// Paused by the narrative.
    Dormant,
    /// Concluded.
    Resolved,
    /// Dropped without resolution.
    Abandoned,
}

impl PlotlineStatus {
    /// Returns the status as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Dormant => "dormant",
            Self::Resolved => "resolved",
            Self::Abandoned => "abandoned",
        }
    }

    /// Parses a status from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(Self::Active),
            "dormant" | "paused" => Some(Self::Dormant),
            "resolved" | "completed" => Some(Self::Resolved),
            "abandoned" => Some(Self::Abandoned),
            _ => None,
        }
    }
}

impl fmt::Display for PlotlineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A tracked story arc.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plotline {
    /// Unique identifier.
    pub id: String,
    /// Owning session.
    pub session_id: String,
    /// Short title.
    pub title: String,
    /// Longer description.
    pub description: String,
    /// Progress state.
    pub status: PlotlineStatus,
    /// Priority, higher is more important.
    pub priority: i32,
    /// When the arc began.
    pub start_time: DateTime<Utc>,
    /// When the arc ended, if it has.
    pub end_time: Option<DateTime<Utc>>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Entities participating in the arc.
    #[serde(default)]
    pub entity_associations: Vec<EntityAssociation>,
}

impl Plotline {
    /// Creates an active plotline with a generated ID.
    #[must_use]
    pub fn new(session_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            session_id: session_id.into(),
            title: title.into(),
            description: String::new(),
            status: PlotlineStatus::Active,
            priority: 0,
            start_time: crate::now(),
            end_time: None,
            metadata: Map::new(),
            entity_associations: Vec::new(),
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Adds an entity association.
    #[must_use]
    pub fn with_association(mut self, association: EntityAssociation) -> Self {
        self.entity_associations.push(association);
        self
    }
}

/// Partial update applied to a plotline. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlotlineUpdate {
    /// New title.
    pub title: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New status. Moving to `Resolved` or `Abandoned` stamps `end_time`.
    pub status: Option<PlotlineStatus>,
    /// New priority.
    pub priority: Option<i32>,
    /// Associations to replace the current set with.
    pub entity_associations: Option<Vec<EntityAssociation>>,
}

impl PlotlineUpdate {
    /// Applies the update in place.
    pub fn apply_to(self, plotline: &mut Plotline) {
        if let Some(title) = self.title {
            plotline.title = title;
        }
        if let Some(description) = self.description {
            plotline.description = description;
        }
        if let Some(status) = self.status {
            plotline.status = status;
            let closed = matches!(
                status,
                PlotlineStatus::Resolved | PlotlineStatus::Abandoned
            );
            if closed && plotline.end_time.is_none() {
                plotline.end_time = Some(crate::now());
            } else if !closed {
                plotline.end_time = None;
            }
        }
        if let Some(priority) = self.priority {
            plotline.priority = priority;
        }
        if let Some(associations) = self.entity_associations {
            plotline.entity_associations = associations;
        }
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_association_relevance_clamped() {
        let a = EntityAssociation::new("e1".into(), "witness", 3.0);
        assert_eq!(a.relevance, 1.0);
    }

    #[test]
    fn test_fact_referenced_entities_dedup() {
        let fact = Fact::new("s1", "event")
            .with_field("what", json!("duel"))
            .between("a".into(), "b".into())
            .with_association(EntityAssociation::new("a".into(), "subject", 0.9))
            .with_association(EntityAssociation::new("c".into(), "witness", 0.4));
        let ids: Vec<&str> = fact
            .referenced_entities()
            .into_iter()
            .map(EntityId::as_str)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_plotline_update_stamps_end_time() {
        let mut p = Plotline::new("s1", "The Heist");
        PlotlineUpdate {
            status: Some(PlotlineStatus::Resolved),
            priority: Some(5),
            ..PlotlineUpdate::default()
        }
        .apply_to(&mut p);
        assert_eq!(p.status, PlotlineStatus::Resolved);
        assert_eq!(p.priority, 5);
        assert!(p.end_time.is_some());

        PlotlineUpdate {
            status: Some(PlotlineStatus::Active),
            ..PlotlineUpdate::default()
        }
        .apply_to(&mut p);
        assert!(p.end_time.is_none());
    }
}
