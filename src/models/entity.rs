//! Entity types and identifiers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Unique identifier for an entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Creates an entity ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh, time-ordered entity ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Category of world knowledge an entity represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// A person or creature in the story.
    Character,
    /// A place.
    Location,
    /// An established piece of world truth.
    Fact,
    /// Something that happened.
    Event,
    /// A story arc.
    Plotline,
    /// A physical item.
    Object,
    /// An abstract idea, faction, or rule.
    Concept,
    /// Narrative style guidance.
    Style,
    /// A reified relationship between characters.
    Relationship,
}

impl EntityType {
    /// Returns all entity types.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Character,
            Self::Location,
            Self::Fact,
            Self::Event,
            Self::Plotline,
            Self::Object,
            Self::Concept,
            Self::Style,
            Self::Relationship,
        ]
    }

    /// Returns the type as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Character => "character",
            Self::Location => "location",
            Self::Fact => "fact",
            Self::Event => "event",
            Self::Plotline => "plotline",
            Self::Object => "object",
            Self::Concept => "concept",
            Self::Style => "style",
            Self::Relationship => "relationship",
        }
    }

    /// Parses an entity type from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "character" => Some(Self::Character),
            "location" => Some(Self::Location),
            "fact" => Some(Self::Fact),
            "event" => Some(Self::Event),
            "plotline" | "plot" => Some(Self::Plotline),
            "object" | "item" => Some(Self::Object),
            "concept" => Some(Self::Concept),
            "style" => Some(Self::Style),
            "relationship" => Some(Self::Relationship),
            _ => None,
        }
    }

    /// Returns true if entities of this type are written to the semantic index.
    ///
    /// Style guidance is retrieved by type, never by similarity.
    #[must_use]
    pub const fn is_searchable(&self) -> bool {
        !matches!(self, Self::Style)
    }

    /// Relative narrative weight used by importance scoring.
    #[must_use]
    pub const fn importance_weight(&self) -> f64 {
        match self {
            Self::Plotline => 1.0,
            Self::Event => 0.9,
            Self::Character => 0.8,
            Self::Fact | Self::Relationship => 0.7,
            Self::Location => 0.6,
            Self::Concept => 0.5,
            Self::Object => 0.4,
            Self::Style => 0.2,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| crate::Error::InvalidInput(format!("unknown entity type: {s}")))
    }
}

/// An addressable unit of world knowledge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Unique identifier.
    pub id: EntityId,
    /// Session the entity belongs to.
    pub session_id: String,
    /// Entity category.
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    /// Semi-structured content fields.
    pub content: Map<String, Value>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time, never earlier than `created_at`.
    pub updated_at: DateTime<Utc>,
    /// Monotonic version, starting at 1.
    pub version: u32,
    /// Free-form metadata (importance overrides, provenance, ...).
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Entity {
    /// Creates a new entity with a generated ID, version 1, and empty content.
    #[must_use]
    pub fn new(session_id: impl Into<String>, entity_type: EntityType) -> Self {
        let ts = crate::now();
        Self {
            id: EntityId::generate(),
            session_id: session_id.into(),
            entity_type,
            content: Map::new(),
            created_at: ts,
            updated_at: ts,
            version: 1,
            metadata: Map::new(),
        }
    }

    /// Sets an explicit ID.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<EntityId>) -> Self {
        self.id = id.into();
        self
    }

    /// Sets a content field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.content.insert(key.into(), value);
        self
    }

    /// Replaces the content map.
    #[must_use]
    pub fn with_content(mut self, content: Map<String, Value>) -> Self {
        self.content = content;
        self
    }

    /// Sets a metadata field.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Sets both timestamps.
    #[must_use]
    pub const fn with_created_at(mut self, ts: DateTime<Utc>) -> Self {
        self.created_at = ts;
        self.updated_at = ts;
        self
    }

    /// Returns a content field as a string, if present and a string.
    #[must_use]
    pub fn content_str(&self, key: &str) -> Option<&str> {
        self.content.get(key).and_then(Value::as_str)
    }

    /// Best-effort display name (`name`, then `title`, then the ID).
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.content_str("name")
            .or_else(|| self.content_str("title"))
            .unwrap_or_else(|| self.id.as_str())
    }

    /// Flattens content into a single line of text for embedding and keyword search.
    ///
    /// Keys are visited in sorted order so the same content always produces
    /// the same text.
    #[must_use]
    pub fn searchable_text(&self) -> String {
        let mut keys: Vec<&String> = self.content.keys().collect();
        keys.sort();
        let mut parts = Vec::with_capacity(keys.len() + 1);
        parts.push(self.entity_type.as_str().to_string());
        for key in keys {
            if let Some(value) = self.content.get(key) {
                parts.push(format!("{key}: {}", value_text(value)));
            }
        }
        parts.join(" | ")
    }

    /// Lowercased content values used for keyword filtering.
    ///
    /// Only values are included (nested objects and arrays are flattened),
    /// so a keyword never matches a field name. Lowercasing is Unicode-aware
    /// and every store filters against this same text.
    #[must_use]
    pub fn keyword_text(&self) -> String {
        let mut keys: Vec<&String> = self.content.keys().collect();
        keys.sort();
        let mut parts = Vec::new();
        for key in keys {
            if let Some(value) = self.content.get(key) {
                collect_values(value, &mut parts);
            }
        }
        parts.join("\n").to_lowercase()
    }

    /// A short one-line summary of the content, capped at `max_chars` characters.
    #[must_use]
    pub fn content_summary(&self, max_chars: usize) -> String {
        let text = self
            .content_str("description")
            .or_else(|| self.content_str("summary"))
            .map_or_else(
                || format!("{}: {}", self.entity_type, self.display_name()),
                |d| format!("{}: {d}", self.display_name()),
            );
        truncate_chars(&text, max_chars)
    }
}

/// Renders a JSON value without quoting plain strings.
#[must_use]
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn collect_values(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Null => {},
        Value::Array(items) => items.iter().for_each(|v| collect_values(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_values(v, out)),
        other => out.push(value_text(other)),
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

/// Partial update applied to an existing entity.
///
/// Only the named top-level content fields are replaced; every other field
/// keeps its prior value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityUpdate {
    /// Content fields to set.
    pub content: Map<String, Value>,
    /// Metadata fields to set.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Who made the change, recorded in the version history.
    #[serde(default)]
    pub changed_by: Option<String>,
    /// Why the change was made, recorded in the version history.
    #[serde(default)]
    pub reason: Option<String>,
}

impl EntityUpdate {
    /// Creates an empty update.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a content field.
    #[must_use]
    pub fn set(mut self, key: impl Into<String>, value: Value) -> Self {
        self.content.insert(key.into(), value);
        self
    }

    /// Sets a metadata field.
    #[must_use]
    pub fn set_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Records the author of the change.
    #[must_use]
    pub fn by(mut self, changed_by: impl Into<String>) -> Self {
        self.changed_by = Some(changed_by.into());
        self
    }

    /// Records the reason for the change.
    #[must_use]
    pub fn because(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Returns true if the update changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.metadata.is_empty()
    }

    /// Applies the update to `entity`, returning the names of content fields whose value changed.
    ///
    /// Bumps `version` by exactly one and refreshes `updated_at`.
    pub fn apply_to(&self, entity: &mut Entity) -> Vec<String> {
        let mut changed: Vec<String> = self
            .content
            .iter()
            .filter(|(k, v)| entity.content.get(*k) != Some(*v))
            .map(|(k, _)| k.clone())
            .collect();
        changed.sort();

        for (key, value) in &self.content {
            entity.content.insert(key.clone(), value.clone());
        }
        for (key, value) in &self.metadata {
            entity.metadata.insert(key.clone(), value.clone());
        }
        entity.version += 1;
        entity.updated_at = crate::now().max(entity.created_at);
        changed
    }
}
