//! Structured consistency issues.

use super::EntityId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// Kind of inconsistency detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    /// Two entities are timestamped implausibly close, or out of order.
    TemporalConflict,
    /// Two facts assert different values for the same attribute.
    FactContradiction,
    /// A relation references an entity that does not exist.
    RelationshipInconsistency,
    /// Two entities have identical canonical content.
    EntityDuplicate,
    /// A type-specific narrative rule is violated.
    LogicalContradiction,
}

impl IssueType {
    /// Returns all issue types.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::TemporalConflict,
            Self::FactContradiction,
            Self::RelationshipInconsistency,
            Self::EntityDuplicate,
            Self::LogicalContradiction,
        ]
    }

    /// Returns the issue type as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TemporalConflict => "temporal_conflict",
            Self::FactContradiction => "fact_contradiction",
            Self::RelationshipInconsistency => "relationship_inconsistency",
            Self::EntityDuplicate => "entity_duplicate",
            Self::LogicalContradiction => "logical_contradiction",
        }
    }

    /// Parses an issue type from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::all().iter().copied().find(|t| t.as_str() == s)
    }
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How serious an issue is. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    /// Cosmetic.
    Low,
    /// Worth reviewing.
    Medium,
    /// Likely to break narrative continuity.
    High,
    /// Must be resolved before continuing.
    Critical,
}

impl IssueSeverity {
    /// Returns the severity as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Parses a severity from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single detected inconsistency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyIssue {
    /// Deterministic identifier derived from type and affected ids.
    pub issue_id: String,
    /// Kind of issue.
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    /// Severity.
    pub severity: IssueSeverity,
    /// Human-readable description.
    pub description: String,
    /// Entities involved, sorted.
    pub affected_entity_ids: Vec<EntityId>,
    /// The data that conflicts, for display and automated fixes.
    pub conflicting_data: Value,
    /// Suggested remediations.
    pub suggested_fixes: Vec<String>,
    /// Whether a caller has marked the issue resolved.
    pub resolved: bool,
    /// When the issue was detected.
    pub detected_at: DateTime<Utc>,
    /// When the issue was resolved.
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ConsistencyIssue {
    /// Creates an unresolved issue.
    ///
    /// Affected ids are sorted and deduplicated; the issue id is a hash of the
    /// type, the sorted ids, and `discriminator`, so rerunning a check over
    /// the same data yields the same ids.
    #[must_use]
    pub fn new(
        issue_type: IssueType,
        severity: IssueSeverity,
        description: impl Into<String>,
        mut affected_entity_ids: Vec<EntityId>,
        discriminator: &str,
    ) -> Self {
        affected_entity_ids.sort();
        affected_entity_ids.dedup();
        let issue_id = issue_id_for(issue_type, &affected_entity_ids, discriminator);
        Self {
            issue_id,
            issue_type,
            severity,
            description: description.into(),
            affected_entity_ids,
            conflicting_data: Value::Null,
            suggested_fixes: Vec::new(),
            resolved: false,
            detected_at: crate::now(),
            resolved_at: None,
        }
    }

    /// Attaches the conflicting data.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.conflicting_data = data;
        self
    }

    /// Adds a suggested fix.
    #[must_use]
    pub fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.suggested_fixes.push(fix.into());
        self
    }

    /// Returns true if `id` is among the affected entities.
    #[must_use]
    pub fn affects(&self, id: &EntityId) -> bool {
        self.affected_entity_ids.binary_search(id).is_ok()
    }
}

fn issue_id_for(issue_type: IssueType, ids: &[EntityId], discriminator: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(issue_type.as_str().as_bytes());
    for id in ids {
        hasher.update([0u8]);
        hasher.update(id.as_str().as_bytes());
    }
    hasher.update([0u8]);
    hasher.update(discriminator.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{}-{}", issue_type.as_str(), &digest[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_id_is_deterministic_and_order_independent() {
        let a = ConsistencyIssue::new(
            IssueType::EntityDuplicate,
            IssueSeverity::Medium,
            "dup",
            vec!["b".into(), "a".into()],
            "",
        );
        let b = ConsistencyIssue::new(
            IssueType::EntityDuplicate,
            IssueSeverity::Medium,
            "dup again",
            vec!["a".into(), "b".into(), "a".into()],
            "",
        );
        assert_eq!(a.issue_id, b.issue_id);
        assert_eq!(b.affected_entity_ids.len(), 2);
        assert!(a.issue_id.starts_with("entity_duplicate-"));
        assert!(a.affects(&"b".into()));
    }

    #[test]
    fn test_discriminator_separates_issues() {
        let a = ConsistencyIssue::new(
            IssueType::RelationshipInconsistency,
            IssueSeverity::High,
            "",
            vec!["a".into()],
            "a->x:knows",
        );
        let b = ConsistencyIssue::new(
            IssueType::RelationshipInconsistency,
            IssueSeverity::High,
            "",
            vec!["a".into()],
            "a->y:knows",
        );
        assert_ne!(a.issue_id, b.issue_id);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(IssueSeverity::Critical > IssueSeverity::High);
        assert!(IssueSeverity::Medium > IssueSeverity::Low);
        assert_eq!(IssueSeverity::parse("HIGH"), Some(IssueSeverity::High));
    }
}
