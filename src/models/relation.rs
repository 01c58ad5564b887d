//! Typed, directed, weighted relations between entities.

// f64::clamp is not const-stable
#![allow(clippy::missing_const_for_fn)]

use super::EntityId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Type of a relation between two entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    /// Source is a component of target.
    PartOf,
    /// Source was caused by target.
    CausedBy,
    /// Source is located at target.
    LocatedAt,
    /// General association.
    RelatedTo,
    /// Source owns target.
    Owns,
    /// Source knows target.
    Knows,
    /// Source involves target (events and plotlines involving characters).
    Involves,
    /// Source happens before target.
    Precedes,
    /// Source is allied with target.
    AlliedWith,
    /// Source is hostile to target.
    EnemyOf,
    /// Source is a member of target (factions, groups).
    MemberOf,
}

impl RelationType {
    /// Returns all relation types.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::PartOf,
            Self::CausedBy,
            Self::LocatedAt,
            Self::RelatedTo,
            Self::Owns,
            Self::Knows,
            Self::Involves,
            Self::Precedes,
            Self::AlliedWith,
            Self::EnemyOf,
            Self::MemberOf,
        ]
    }

    /// Returns the relation type as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PartOf => "part_of",
            Self::CausedBy => "caused_by",
            Self::LocatedAt => "located_at",
            Self::RelatedTo => "related_to",
            Self::Owns => "owns",
            Self::Knows => "knows",
            Self::Involves => "involves",
            Self::Precedes => "precedes",
            Self::AlliedWith => "allied_with",
            Self::EnemyOf => "enemy_of",
            Self::MemberOf => "member_of",
        }
    }

    /// Parses a relation type from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "part_of" | "partof" => Some(Self::PartOf),
            "caused_by" | "causedby" => Some(Self::CausedBy),
            "located_at" | "locatedat" | "in" => Some(Self::LocatedAt),
            "related_to" | "relatedto" | "relates_to" => Some(Self::RelatedTo),
            "owns" => Some(Self::Owns),
            "knows" => Some(Self::Knows),
            "involves" => Some(Self::Involves),
            "precedes" | "before" => Some(Self::Precedes),
            "allied_with" | "ally" => Some(Self::AlliedWith),
            "enemy_of" | "enemy" => Some(Self::EnemyOf),
            "member_of" | "memberof" => Some(Self::MemberOf),
            _ => None,
        }
    }

    /// Returns true if the relation reads the same in both directions.
    #[must_use]
    pub const fn is_symmetric(&self) -> bool {
        matches!(
            self,
            Self::RelatedTo | Self::Knows | Self::AlliedWith | Self::EnemyOf
        )
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RelationType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
            .ok_or_else(|| crate::Error::InvalidInput(format!("unknown relation type: {s}")))
    }
}

/// A directed edge between two entities.
///
/// Uniqueness key is `(source_id, target_id, relation_type)`. Endpoints are
/// not checked for existence on write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    /// Source entity.
    pub source_id: EntityId,
    /// Target entity.
    pub target_id: EntityId,
    /// Relation type.
    pub relation_type: RelationType,
    /// Strength in `[0, 1]`.
    pub strength: f64,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Relation {
    /// Creates a relation with full strength and no metadata.
    #[must_use]
    pub fn new(source_id: EntityId, target_id: EntityId, relation_type: RelationType) -> Self {
        Self {
            source_id,
            target_id,
            relation_type,
            strength: 1.0,
            metadata: Map::new(),
        }
    }

    /// Sets the strength, clamped to `[0, 1]`.
    #[must_use]
    pub fn with_strength(mut self, strength: f64) -> Self {
        self.strength = if strength.is_nan() {
            0.0
        } else {
            strength.clamp(0.0, 1.0)
        };
        self
    }

    /// Adds a metadata field.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Returns the uniqueness key of this relation.
    #[must_use]
    pub fn key(&self) -> (&EntityId, &EntityId, RelationType) {
        (&self.source_id, &self.target_id, self.relation_type)
    }

    /// Returns true if `id` is either endpoint.
    #[must_use]
    pub fn touches(&self, id: &EntityId) -> bool {
        &self.source_id == id || &self.target_id == id
    }

    /// Returns the endpoint opposite `id`, if `id` is an endpoint.
    #[must_use]
    pub fn other_end(&self, id: &EntityId) -> Option<&EntityId> {
        if &self.source_id == id {
            Some(&self.target_id)
        } else if &self.target_id == id {
            Some(&self.source_id)
        } else {
            None
        }
    }
}
