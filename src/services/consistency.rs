//! Batch consistency checking over world snapshots.
//!
//! The checker is a pure function of `(entities, relations)`. It never
//! touches a store and never fails: issues are reported, not raised. Callers
//! that want a detected issue to be fatal use [`ensure_consistent`].

use crate::config::ConsistencyConfig;
use crate::models::{
    ConsistencyIssue, Entity, EntityId, EntityType, IssueSeverity, IssueType, Relation,
    RelationType, value_text,
};
use crate::storage::sqlite::acquire_lock;
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Instant;
use tracing::instrument;

/// A single, independently composable consistency rule.
pub trait ConsistencyCheck: Send + Sync {
    /// Rule name for logging and metrics.
    fn name(&self) -> &'static str;

    /// Inspects a snapshot and reports every violation found.
    fn check(&self, entities: &[Entity], relations: &[Relation]) -> Vec<ConsistencyIssue>;
}

// ============================================================================
// Duplicate detection
// ============================================================================

/// Flags entities of the same type whose canonicalized content is identical.
#[derive(Debug, Clone, Copy, Default)]
pub struct DuplicateCheck;

impl DuplicateCheck {
    /// Hash of the entity type and its content with every object's keys sorted.
    #[must_use]
    pub fn fingerprint(entity: &Entity) -> String {
        let mut hasher = Sha256::new();
        hasher.update(entity.entity_type.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(canonical(&Value::Object(entity.content.clone())).to_string());
        hex::encode(hasher.finalize())
    }
}

fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, canonical(v))).collect();
            let mut out = Map::new();
            for (k, v) in sorted {
                out.insert(k.clone(), v);
            }
            Value::Object(out)
        },
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

impl ConsistencyCheck for DuplicateCheck {
    fn name(&self) -> &'static str {
        "duplicates"
    }

    fn check(&self, entities: &[Entity], _relations: &[Relation]) -> Vec<ConsistencyIssue> {
        let mut groups: HashMap<String, Vec<&Entity>> = HashMap::new();
        for entity in entities {
            groups
                .entry(Self::fingerprint(entity))
                .or_default()
                .push(entity);
        }

        groups
            .into_iter()
            .filter(|(_, group)| group.len() > 1)
            .filter_map(|(fingerprint, mut group)| {
                group.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
                let keep = group.first()?;
                let ids: Vec<EntityId> = group.iter().map(|e| e.id.clone()).collect();
                Some(
                    ConsistencyIssue::new(
                        IssueType::EntityDuplicate,
                        IssueSeverity::Medium,
                        format!(
                            "{} {} entities share identical content",
                            group.len(),
                            keep.entity_type
                        ),
                        ids.clone(),
                        "",
                    )
                    .with_data(json!({ "fingerprint": fingerprint, "entity_ids": ids }))
                    .with_fix(format!("merge into the oldest entity {}", keep.id)),
                )
            })
            .collect()
    }
}

// ============================================================================
// Temporal conflicts
// ============================================================================

/// Flags same-type entities created too close together, and `Precedes`
/// relations whose source was created after its target.
///
/// The proximity rule is a tunable heuristic, not proof of a narrative time
/// conflict.
#[derive(Debug, Clone, Copy)]
pub struct TemporalCheck {
    window: Duration,
}

impl TemporalCheck {
    /// Creates the check with a proximity window in hours.
    #[must_use]
    pub fn new(window_hours: f64) -> Self {
        // Sub-millisecond precision is meaningless for stored timestamps.
        #[allow(clippy::cast_possible_truncation)]
        let millis = (window_hours.max(0.0) * 3_600_000.0) as i64;
        Self {
            window: Duration::milliseconds(millis),
        }
    }

    fn proximity_issues(&self, entities: &[Entity]) -> Vec<ConsistencyIssue> {
        let mut by_type: HashMap<EntityType, Vec<&Entity>> = HashMap::new();
        for entity in entities {
            by_type.entry(entity.entity_type).or_default().push(entity);
        }

        let mut issues = Vec::new();
        for group in by_type.values_mut() {
            group.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
            for pair in group.windows(2) {
                let (earlier, later) = (pair[0], pair[1]);
                let delta = later.created_at - earlier.created_at;
                if delta >= self.window {
                    continue;
                }
                issues.push(
                    ConsistencyIssue::new(
                        IssueType::TemporalConflict,
                        IssueSeverity::Medium,
                        format!(
                            "{} entities '{}' and '{}' are only {}s apart",
                            earlier.entity_type,
                            earlier.display_name(),
                            later.display_name(),
                            delta.num_seconds()
                        ),
                        vec![earlier.id.clone(), later.id.clone()],
                        "proximity",
                    )
                    .with_data(json!({
                        "delta_seconds": delta.num_seconds(),
                        "window_seconds": self.window.num_seconds(),
                    }))
                    .with_fix("confirm the events are distinct or adjust their timestamps"),
                );
            }
        }
        issues
    }

    fn ordering_issues(entities: &[Entity], relations: &[Relation]) -> Vec<ConsistencyIssue> {
        let by_id: HashMap<&EntityId, &Entity> = entities.iter().map(|e| (&e.id, e)).collect();
        relations
            .iter()
            .filter(|r| r.relation_type == RelationType::Precedes)
            .filter_map(|r| {
                let source = by_id.get(&r.source_id)?;
                let target = by_id.get(&r.target_id)?;
                (source.created_at > target.created_at).then(|| {
                    ConsistencyIssue::new(
                        IssueType::TemporalConflict,
                        IssueSeverity::High,
                        format!(
                            "'{}' precedes '{}' but happened after it",
                            source.display_name(),
                            target.display_name()
                        ),
                        vec![r.source_id.clone(), r.target_id.clone()],
                        "precedes",
                    )
                    .with_data(json!({
                        "source_created_at": source.created_at,
                        "target_created_at": target.created_at,
                    }))
                    .with_fix("reverse the precedes relation or correct the timestamps")
                })
            })
            .collect()
    }
}

impl Default for TemporalCheck {
    fn default() -> Self {
        Self::new(24.0)
    }
}

impl ConsistencyCheck for TemporalCheck {
    fn name(&self) -> &'static str {
        "temporal"
    }

    fn check(&self, entities: &[Entity], relations: &[Relation]) -> Vec<ConsistencyIssue> {
        let mut issues = self.proximity_issues(entities);
        issues.extend(Self::ordering_issues(entities, relations));
        issues
    }
}

// ============================================================================
// Logical contradictions
// ============================================================================

/// Type-specific rules. Currently: a dead character must not take part in
/// a later event.
///
/// A character's time of death is `content.died_at` (RFC 3339) when present,
/// otherwise its `updated_at`. Participation is an event's
/// `content.participants` (ids or names) or an `Involves` relation from the
/// event to the character.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogicalCheck;

impl LogicalCheck {
    fn is_dead(entity: &Entity) -> bool {
        entity
            .content_str("status")
            .is_some_and(|s| s.eq_ignore_ascii_case("dead") || s.eq_ignore_ascii_case("deceased"))
    }

    fn died_at(entity: &Entity) -> DateTime<Utc> {
        entity
            .content_str("died_at")
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map_or(entity.updated_at, |t| t.with_timezone(&Utc))
    }

    fn participants(event: &Entity) -> Vec<String> {
        match event.content.get("participants") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| value_text(v).to_lowercase())
                .collect(),
            Some(Value::String(s)) => s
                .split(',')
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl ConsistencyCheck for LogicalCheck {
    fn name(&self) -> &'static str {
        "logical"
    }

    fn check(&self, entities: &[Entity], relations: &[Relation]) -> Vec<ConsistencyIssue> {
        let dead: Vec<&Entity> = entities
            .iter()
            .filter(|e| e.entity_type == EntityType::Character && Self::is_dead(e))
            .collect();
        if dead.is_empty() {
            return Vec::new();
        }

        let involves: HashSet<(&EntityId, &EntityId)> = relations
            .iter()
            .filter(|r| r.relation_type == RelationType::Involves)
            .map(|r| (&r.source_id, &r.target_id))
            .collect();

        let mut issues = Vec::new();
        for event in entities.iter().filter(|e| e.entity_type == EntityType::Event) {
            let named = Self::participants(event);
            for character in &dead {
                let died_at = Self::died_at(character);
                if event.created_at <= died_at {
                    continue;
                }
                let takes_part = involves.contains(&(&event.id, &character.id))
                    || named.iter().any(|p| {
                        p == character.id.as_str()
                            || p == &character.display_name().to_lowercase()
                    });
                if !takes_part {
                    continue;
                }
                issues.push(
                    ConsistencyIssue::new(
                        IssueType::LogicalContradiction,
                        IssueSeverity::High,
                        format!(
                            "dead character '{}' participates in later event '{}'",
                            character.display_name(),
                            event.display_name()
                        ),
                        vec![character.id.clone(), event.id.clone()],
                        "dead_participant",
                    )
                    .with_data(json!({
                        "died_at": died_at,
                        "event_at": event.created_at,
                    }))
                    .with_fix("remove the character from the event")
                    .with_fix("revive the character before the event"),
                );
            }
        }
        issues
    }
}

// ============================================================================
// Relationship references
// ============================================================================

/// Flags relations whose endpoints are missing from the snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelationshipCheck;

impl ConsistencyCheck for RelationshipCheck {
    fn name(&self) -> &'static str {
        "relationships"
    }

    fn check(&self, entities: &[Entity], relations: &[Relation]) -> Vec<ConsistencyIssue> {
        let known: HashSet<&EntityId> = entities.iter().map(|e| &e.id).collect();
        relations
            .iter()
            .filter_map(|r| {
                let mut missing = Vec::new();
                if !known.contains(&r.source_id) {
                    missing.push(r.source_id.clone());
                }
                if !known.contains(&r.target_id) {
                    missing.push(r.target_id.clone());
                }
                if missing.is_empty() {
                    return None;
                }
                Some(
                    ConsistencyIssue::new(
                        IssueType::RelationshipInconsistency,
                        IssueSeverity::High,
                        format!(
                            "{} relation {} -> {} references missing entities",
                            r.relation_type, r.source_id, r.target_id
                        ),
                        vec![r.source_id.clone(), r.target_id.clone()],
                        r.relation_type.as_str(),
                    )
                    .with_data(json!({
                        "relation_type": r.relation_type,
                        "missing": missing,
                    }))
                    .with_fix(format!(
                        "remove relation {} -[{}]-> {}",
                        r.source_id, r.relation_type, r.target_id
                    )),
                )
            })
            .collect()
    }
}

// ============================================================================
// Fact contradictions
// ============================================================================

/// Flags Fact entities asserting different values for the same
/// `subject` and `attribute`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FactContradictionCheck;

impl ConsistencyCheck for FactContradictionCheck {
    fn name(&self) -> &'static str {
        "facts"
    }

    fn check(&self, entities: &[Entity], _relations: &[Relation]) -> Vec<ConsistencyIssue> {
        let mut claims: BTreeMap<(String, String), BTreeMap<String, Vec<EntityId>>> =
            BTreeMap::new();
        for fact in entities.iter().filter(|e| e.entity_type == EntityType::Fact) {
            let (Some(subject), Some(attribute), Some(value)) = (
                fact.content_str("subject"),
                fact.content_str("attribute"),
                fact.content.get("value"),
            ) else {
                continue;
            };
            claims
                .entry((subject.to_lowercase(), attribute.to_lowercase()))
                .or_default()
                .entry(value_text(value))
                .or_default()
                .push(fact.id.clone());
        }

        claims
            .into_iter()
            .filter(|(_, values)| values.len() > 1)
            .map(|((subject, attribute), values)| {
                let ids: Vec<EntityId> = values.values().flatten().cloned().collect();
                ConsistencyIssue::new(
                    IssueType::FactContradiction,
                    IssueSeverity::Medium,
                    format!(
                        "{} conflicting values for {subject}.{attribute}",
                        values.len()
                    ),
                    ids,
                    &format!("{subject}\u{0}{attribute}"),
                )
                .with_data(json!({
                    "subject": subject,
                    "attribute": attribute,
                    "values": values,
                }))
                .with_fix("retire the outdated fact")
            })
            .collect()
    }
}

// ============================================================================
// Checker and registry
// ============================================================================

/// Runs a configurable set of [`ConsistencyCheck`]s over a snapshot.
pub struct ConsistencyChecker {
    checks: Vec<Box<dyn ConsistencyCheck>>,
}

impl ConsistencyChecker {
    /// Builds the checks enabled in `config`.
    #[must_use]
    pub fn new(config: &ConsistencyConfig) -> Self {
        let mut checks: Vec<Box<dyn ConsistencyCheck>> = Vec::new();
        if config.check_duplicates {
            checks.push(Box::new(DuplicateCheck));
        }
        if config.check_temporal {
            checks.push(Box::new(TemporalCheck::new(config.temporal_window_hours)));
        }
        if config.check_logical {
            checks.push(Box::new(LogicalCheck));
        }
        if config.check_relationships {
            checks.push(Box::new(RelationshipCheck));
        }
        if config.check_facts {
            checks.push(Box::new(FactContradictionCheck));
        }
        Self { checks }
    }

    /// A checker with no rules.
    #[must_use]
    pub fn empty() -> Self {
        Self { checks: Vec::new() }
    }

    /// Adds a rule.
    #[must_use]
    pub fn with_check(mut self, check: Box<dyn ConsistencyCheck>) -> Self {
        self.checks.push(check);
        self
    }

    /// Names of the active rules, in run order.
    #[must_use]
    pub fn check_names(&self) -> Vec<&'static str> {
        self.checks.iter().map(|c| c.name()).collect()
    }

    /// Runs every rule, most severe issues first.
    ///
    /// A rule that panics is logged and skipped; the remaining rules still run.
    #[instrument(
        skip(self, entities, relations),
        fields(operation = "check_consistency", entities = entities.len(), relations = relations.len())
    )]
    pub fn check(&self, entities: &[Entity], relations: &[Relation]) -> Vec<ConsistencyIssue> {
        let start = Instant::now();
        let mut issues = Vec::new();
        for check in &self.checks {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                check.check(entities, relations)
            }));
            match outcome {
                Ok(found) => {
                    tracing::debug!(check = check.name(), found = found.len(), "Check finished");
                    issues.extend(found);
                },
                Err(_) => {
                    tracing::error!(check = check.name(), "Consistency check panicked, skipping");
                },
            }
        }

        issues.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| a.issue_id.cmp(&b.issue_id))
        });
        for issue in &issues {
            metrics::counter!(
                "consistency_issues_total",
                "type" => issue.issue_type.as_str(),
                "severity" => issue.severity.as_str()
            )
            .increment(1);
        }
        metrics::histogram!("consistency_check_duration_ms")
            .record(start.elapsed().as_secs_f64() * 1000.0);
        issues
    }
}

impl Default for ConsistencyChecker {
    fn default() -> Self {
        Self::new(&ConsistencyConfig::default())
    }
}

/// Tracks detected issues across check passes.
///
/// Issues are keyed by their deterministic id, so re-detecting an issue does
/// not duplicate it. A re-detected issue keeps its resolution state.
#[derive(Default)]
pub struct IssueRegistry {
    issues: Mutex<HashMap<String, ConsistencyIssue>>,
}

impl IssueRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records issues, returning how many were new.
    pub fn record(&self, issues: &[ConsistencyIssue]) -> usize {
        let mut map = acquire_lock(&self.issues);
        let mut added = 0;
        for issue in issues {
            if !map.contains_key(&issue.issue_id) {
                map.insert(issue.issue_id.clone(), issue.clone());
                added += 1;
            }
        }
        added
    }

    /// Returns one issue.
    #[must_use]
    pub fn get(&self, issue_id: &str) -> Option<ConsistencyIssue> {
        acquire_lock(&self.issues).get(issue_id).cloned()
    }

    /// Marks an issue resolved. Returns `false` if it is unknown.
    pub fn mark_resolved(&self, issue_id: &str) -> bool {
        self.mark_resolved_at(issue_id, crate::now())
    }

    fn mark_resolved_at(&self, issue_id: &str, at: DateTime<Utc>) -> bool {
        let mut map = acquire_lock(&self.issues);
        let Some(issue) = map.get_mut(issue_id) else {
            return false;
        };
        if !issue.resolved {
            issue.resolved = true;
            issue.resolved_at = Some(at);
        }
        true
    }

    /// Unresolved issues, most severe first.
    #[must_use]
    pub fn get_unresolved(&self) -> Vec<ConsistencyIssue> {
        let mut open: Vec<ConsistencyIssue> = acquire_lock(&self.issues)
            .values()
            .filter(|i| !i.resolved)
            .cloned()
            .collect();
        open.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| a.issue_id.cmp(&b.issue_id))
        });
        open
    }

    /// Number of unresolved issues.
    #[must_use]
    pub fn unresolved_count(&self) -> usize {
        acquire_lock(&self.issues)
            .values()
            .filter(|i| !i.resolved)
            .count()
    }

    /// Removes resolved issues resolved more than `days` ago. Unresolved
    /// issues are never purged.
    pub fn purge_older_than(&self, days: u32) -> usize {
        let cutoff = crate::now() - Duration::days(i64::from(days));
        let mut map = acquire_lock(&self.issues);
        let before = map.len();
        map.retain(|_, issue| {
            !(issue.resolved && issue.resolved_at.is_some_and(|t| t < cutoff))
        });
        let purged = before - map.len();
        if purged > 0 {
            tracing::info!(purged, days, "Purged resolved consistency issues");
        }
        purged
    }

    /// Total tracked issues.
    #[must_use]
    pub fn len(&self) -> usize {
        acquire_lock(&self.issues).len()
    }

    /// Returns true if nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Converts unresolved issues at or above `min_severity` into
/// [`Error::Consistency`].
///
/// # Errors
///
/// Returns [`Error::Consistency`] if any such issue exists.
pub fn ensure_consistent(issues: &[ConsistencyIssue], min_severity: IssueSeverity) -> Result<()> {
    let fatal: Vec<&ConsistencyIssue> = issues
        .iter()
        .filter(|i| !i.resolved && i.severity >= min_severity)
        .collect();
    if fatal.is_empty() {
        return Ok(());
    }
    let mut summary: Vec<String> = fatal
        .iter()
        .take(3)
        .map(|i| format!("[{}] {}", i.severity, i.description))
        .collect();
    if fatal.len() > 3 {
        summary.push(format!("and {} more", fatal.len() - 3));
    }
    Err(Error::Consistency {
        issues: fatal.len(),
        summary: summary.join("; "),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(minutes: i64) -> DateTime<Utc> {
        crate::from_millis(1_700_000_000_000 + minutes * 60_000)
    }

    fn event(name: &str, minutes: i64) -> Entity {
        Entity::new("s1", EntityType::Event)
            .with_field("name", json!(name))
            .with_created_at(at(minutes))
    }

    #[test]
    fn test_duplicates_reported_once_per_group() {
        let a = Entity::new("s1", EntityType::Location)
            .with_field("name", json!("Harbor"))
            .with_field("size", json!({"b": 1, "a": 2}))
            .with_created_at(at(0));
        let b = Entity::new("s1", EntityType::Location)
            .with_field("size", json!({"a": 2, "b": 1}))
            .with_field("name", json!("Harbor"))
            .with_created_at(at(5));
        let other_type = Entity::new("s1", EntityType::Object)
            .with_field("name", json!("Harbor"))
            .with_field("size", json!({"a": 2, "b": 1}));

        let issues = DuplicateCheck.check(&[a.clone(), b.clone(), other_type], &[]);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].issue_type, IssueType::EntityDuplicate);
        assert!(issues[0].affects(&a.id) && issues[0].affects(&b.id));
        assert!(issues[0].suggested_fixes[0].contains(a.id.as_str()));
    }

    #[test]
    fn test_adjacent_events_within_window() {
        let events = vec![event("a", 0), event("b", 10), event("c", 20)];
        let issues = TemporalCheck::default().check(&events, &[]);
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().all(|i| i.issue_type == IssueType::TemporalConflict));
        assert!(issues[0].affects(&events[0].id) || issues[1].affects(&events[0].id));

        let narrow = TemporalCheck::new(0.1).check(&events, &[]);
        assert!(narrow.is_empty());
    }

    #[test]
    fn test_precedes_inversion_is_high() {
        let first = event("dawn", 0);
        let second = event("dusk", 60 * 48);
        let backwards = Relation::new(second.id.clone(), first.id.clone(), RelationType::Precedes);
        let issues = TemporalCheck::new(1.0).check(&[first, second], &[backwards]);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, IssueSeverity::High);
    }

    #[test]
    fn test_dead_character_in_later_event() {
        let mut mira = Entity::new("s1", EntityType::Character)
            .with_field("name", json!("Mira"))
            .with_field("status", json!("dead"))
            .with_created_at(at(0));
        mira.updated_at = at(30);
        let before = event("ambush", 10).with_field("participants", json!(["Mira"]));
        let after = event("feast", 90).with_field("participants", json!(["mira", "Tomas"]));
        let by_relation = event("funeral", 120);
        let involves = Relation::new(by_relation.id.clone(), mira.id.clone(), RelationType::Involves);

        let issues = LogicalCheck.check(
            &[mira.clone(), before, after.clone(), by_relation.clone()],
            &[involves],
        );
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().all(|i| i.severity == IssueSeverity::High));
        assert!(issues.iter().any(|i| i.affects(&after.id)));
        assert!(issues.iter().any(|i| i.affects(&by_relation.id)));
    }

    #[test]
    fn test_missing_target_is_high() {
        let a = Entity::new("s1", EntityType::Character);
        let dangling = Relation::new(a.id.clone(), EntityId::new("ghost"), RelationType::Knows);
        let issues = RelationshipCheck.check(&[a], &[dangling]);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].issue_type, IssueType::RelationshipInconsistency);
        assert_eq!(issues[0].severity, IssueSeverity::High);
        assert_eq!(issues[0].conflicting_data["missing"], json!(["ghost"]));
    }

    #[test]
    fn test_fact_contradiction() {
        let fact = |value: &str| {
            Entity::new("s1", EntityType::Fact)
                .with_field("subject", json!("Mira"))
                .with_field("attribute", json!("eye_color"))
                .with_field("value", json!(value))
        };
        let issues = FactContradictionCheck.check(&[fact("green"), fact("green"), fact("grey")], &[]);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].affected_entity_ids.len(), 3);
        assert!(FactContradictionCheck.check(&[fact("green"), fact("green")], &[]).is_empty());
    }

    #[test]
    fn test_issue_ids_are_stable() {
        let events = vec![event("a", 0), event("b", 10)];
        let checker = ConsistencyChecker::default();
        let first = checker.check(&events, &[]);
        let second = checker.check(&events, &[]);
        let ids = |v: &[ConsistencyIssue]| v.iter().map(|i| i.issue_id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&first), ids(&second));

        let registry = IssueRegistry::new();
        assert_eq!(registry.record(&first), first.len());
        assert_eq!(registry.record(&second), 0);
    }

    #[test]
    fn test_disabled_checks_are_skipped() {
        let config = ConsistencyConfig {
            check_temporal: false,
            ..ConsistencyConfig::default()
        };
        let checker = ConsistencyChecker::new(&config);
        assert!(!checker.check_names().contains(&"temporal"));
        assert!(checker.check(&[event("a", 0), event("b", 1)], &[]).is_empty());
    }

    struct Exploding;

    impl ConsistencyCheck for Exploding {
        fn name(&self) -> &'static str {
            "exploding"
        }

        #[allow(clippy::panic)]
        fn check(&self, _: &[Entity], _: &[Relation]) -> Vec<ConsistencyIssue> {
            panic!("rule bug")
        }
    }

    #[test]
    fn test_panicking_rule_is_skipped() {
        let a = Entity::new("s1", EntityType::Character);
        let dangling = Relation::new(a.id.clone(), EntityId::new("ghost"), RelationType::Knows);
        let checker = ConsistencyChecker::empty()
            .with_check(Box::new(Exploding))
            .with_check(Box::new(RelationshipCheck));
        assert_eq!(checker.check(&[a], &[dangling]).len(), 1);
    }

    #[test]
    fn test_registry_lifecycle() {
        let registry = IssueRegistry::new();
        let issues = TemporalCheck::default().check(&[event("a", 0), event("b", 1)], &[]);
        registry.record(&issues);
        let id = issues[0].issue_id.clone();

        assert_eq!(registry.get_unresolved().len(), 1);
        assert_eq!(registry.purge_older_than(0), 0);

        assert!(registry.mark_resolved_at(&id, crate::now() - Duration::days(10)));
        assert!(!registry.mark_resolved("missing"));
        assert!(registry.get_unresolved().is_empty());
        assert_eq!(registry.purge_older_than(30), 0);
        assert_eq!(registry.purge_older_than(5), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_ensure_consistent_threshold() {
        let a = Entity::new("s1", EntityType::Character);
        let dangling = Relation::new(a.id.clone(), EntityId::new("ghost"), RelationType::Knows);
        let issues = RelationshipCheck.check(&[a], &[dangling]);

        assert!(ensure_consistent(&issues, IssueSeverity::Critical).is_ok());
        let err = ensure_consistent(&issues, IssueSeverity::Medium).unwrap_err();
        assert!(matches!(err, Error::Consistency { issues: 1, .. }));
    }
}
