//! Summaries produced by compaction.

use super::EntityId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Output layout of a generated summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryFormat {
    /// Plain prose.
    #[default]
    Text,
    /// Sectioned: timeline, characters, locations, plot.
    Structured,
    /// Chronological list.
    Timeline,
    /// Bullet list.
    BulletPoints,
}

impl SummaryFormat {
    /// Returns all formats.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Text,
            Self::Structured,
            Self::Timeline,
            Self::BulletPoints,
        ]
    }

    /// Returns the format as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Structured => "structured",
            Self::Timeline => "timeline",
            Self::BulletPoints => "bullet_points",
        }
    }

    /// Parses a format from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "text" | "plain" => Some(Self::Text),
            "structured" => Some(Self::Structured),
            "timeline" => Some(Self::Timeline),
            "bullet_points" | "bullets" => Some(Self::BulletPoints),
            _ => None,
        }
    }
}

impl fmt::Display for SummaryFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SummaryFormat {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
            .ok_or_else(|| crate::Error::InvalidInput(format!("unknown summary format: {s}")))
    }
}

/// How candidate entities are chosen for a summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStrategy {
    /// Oldest entities, excluding the most recent days.
    TimeBased,
    /// Entities whose importance score clears the threshold.
    ImportanceBased,
    /// The largest cluster of temporally adjacent entities.
    RelevanceBased,
    /// Union of time-based and importance-based selection.
    #[default]
    Hybrid,
}

impl SummaryStrategy {
    /// Returns the strategy as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TimeBased => "time_based",
            Self::ImportanceBased => "importance_based",
            Self::RelevanceBased => "relevance_based",
            Self::Hybrid => "hybrid",
        }
    }

    /// Parses a strategy from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "time_based" | "time" => Some(Self::TimeBased),
            "importance_based" | "importance" => Some(Self::ImportanceBased),
            "relevance_based" | "relevance" => Some(Self::RelevanceBased),
            "hybrid" => Some(Self::Hybrid),
            _ => None,
        }
    }
}

impl fmt::Display for SummaryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SummaryStrategy {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
            .ok_or_else(|| crate::Error::InvalidInput(format!("unknown summary strategy: {s}")))
    }
}

/// Which backend produced a summary's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneratedBy {
    /// A language model.
    Llm,
    /// The deterministic template fallback.
    Template,
}

impl GeneratedBy {
    /// Returns the generator kind as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Llm => "llm",
            Self::Template => "template",
        }
    }

    /// Parses a generator kind from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "llm" => Some(Self::Llm),
            "template" => Some(Self::Template),
            _ => None,
        }
    }
}

/// Time range covered by a summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoveragePeriod {
    /// Earliest covered timestamp.
    pub start: DateTime<Utc>,
    /// Latest covered timestamp.
    pub end: DateTime<Utc>,
}

/// A derived, compacted view of a set of entities.
///
/// Creating a summary never deletes the entities it covers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySummary {
    /// Unique identifier.
    pub id: String,
    /// Owning session.
    pub session_id: String,
    /// Generated text.
    pub summary_text: String,
    /// Entities the summary covers.
    pub original_entity_ids: Vec<EntityId>,
    /// Time range covered.
    pub coverage_period: CoveragePeriod,
    /// Importance score per covered entity.
    pub importance_scores: HashMap<EntityId, f64>,
    /// Output layout.
    pub format: SummaryFormat,
    /// Incremented each time the summary is extended.
    pub version: u32,
    /// Backend that produced the text.
    pub generated_by: GeneratedBy,
    /// When the summary was produced.
    pub created_at: DateTime<Utc>,
}

impl MemorySummary {
    /// Returns true if the text came from the deterministic template fallback.
    #[must_use]
    pub fn is_template(&self) -> bool {
        self.generated_by == GeneratedBy::Template
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parse() {
        for f in SummaryFormat::all() {
            assert_eq!(SummaryFormat::parse(f.as_str()), Some(*f));
        }
        assert_eq!(SummaryFormat::parse("bullets"), Some(SummaryFormat::BulletPoints));
        assert!("haiku".parse::<SummaryFormat>().is_err());
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!(
            SummaryStrategy::parse("time-based"),
            Some(SummaryStrategy::TimeBased)
        );
        assert_eq!(SummaryStrategy::default(), SummaryStrategy::Hybrid);
        assert_eq!(GeneratedBy::parse("template"), Some(GeneratedBy::Template));
    }
}
