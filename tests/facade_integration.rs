//! End-to-end tests through `MemoryFacade`.
//!
//! Covers the core guarantees:
//! - store/retrieve fidelity and partial update versioning
//! - hard delete cascades and tombstones
//! - export/import round trips into an empty database
//! - consistency and summarization scenarios over stored data
//! - search degradation without a vector index

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use chrono::Duration;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;
use world_memory::config::{FeatureFlags, MemoryConfig};
use world_memory::models::{
    EntityAssociation, Fact, IssueSeverity, IssueType, Plotline, PlotlineStatus, PlotlineUpdate,
    SummaryFormat, SummaryStrategy,
};
use world_memory::services::{SummaryOptions, ensure_consistent};
use world_memory::storage::{InMemoryEntityStore, VectorFilter};
use world_memory::{
    Entity, EntityId, EntityQuery, EntityStore, EntityType, EntityUpdate, Error, MemoryFacade,
    Relation, RelationType,
};

fn sqlite_memory(dir: &TempDir, name: &str) -> MemoryFacade {
    let config = MemoryConfig::in_memory().with_db_path(dir.path().join(name));
    MemoryFacade::from_config(&config).expect("facade")
}

fn character(session: &str, name: &str) -> Entity {
    Entity::new(session, EntityType::Character)
        .with_field("name", json!(name))
        .with_field("status", json!("alive"))
}

// ============================================================================
// Store, update, delete
// ============================================================================

#[test]
fn test_store_then_retrieve_preserves_type_and_content() {
    let dir = TempDir::new().unwrap();
    let memory = sqlite_memory(&dir, "world.db");
    let entity = Entity::new("s1", EntityType::Location)
        .with_field("name", json!("Iron Harbor"))
        .with_field("tags", json!(["port", "smoke"]))
        .with_field("population", json!(1200));

    let id = memory.store(entity.clone()).unwrap();
    memory.cache().clear();
    let loaded = memory.retrieve(&id).unwrap().expect("stored entity");

    assert_eq!(loaded.entity_type, entity.entity_type);
    assert_eq!(loaded.content, entity.content);
    assert_eq!(loaded, entity);
}

#[test]
fn test_update_bumps_version_once_and_keeps_other_fields() {
    let dir = TempDir::new().unwrap();
    let memory = sqlite_memory(&dir, "world.db");
    let id = memory.store(character("s1", "Mira")).unwrap();

    assert!(
        memory
            .update(&id, EntityUpdate::new().set("x", json!(7)).by("retcon").because("revision"))
            .unwrap()
    );

    let mira = memory.retrieve(&id).unwrap().unwrap();
    assert_eq!(mira.version, 2);
    assert_eq!(mira.content["x"], json!(7));
    assert_eq!(mira.content["name"], json!("Mira"));
    assert_eq!(mira.content["status"], json!("alive"));

    let history = memory.history(&id, 10).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].version, 2);
    assert_eq!(history[0].changed_fields, vec!["x".to_string()]);
    assert_eq!(history[0].changed_by.as_deref(), Some("retcon"));
    assert_eq!(history[0].reason.as_deref(), Some("revision"));
}

#[test]
fn test_delete_removes_entity_and_incident_relations() {
    let dir = TempDir::new().unwrap();
    let memory = sqlite_memory(&dir, "world.db");
    let mira = memory.store(character("s1", "Mira")).unwrap();
    let tobin = memory.store(character("s1", "Tobin")).unwrap();
    let harbor = memory
        .store(Entity::new("s1", EntityType::Location).with_field("name", json!("Harbor")))
        .unwrap();
    memory
        .add_relation(&Relation::new(mira.clone(), tobin.clone(), RelationType::Knows))
        .unwrap();
    memory
        .add_relation(&Relation::new(tobin.clone(), harbor.clone(), RelationType::LocatedAt))
        .unwrap();

    assert!(memory.delete(&tobin).unwrap());

    assert!(memory.retrieve(&tobin).unwrap().is_none());
    for other in [&mira, &harbor] {
        assert!(
            memory
                .get_related(other, None)
                .unwrap()
                .iter()
                .all(|r| !r.touches(&tobin))
        );
    }
    assert!(memory.history(&tobin, 10).unwrap().is_empty());
    assert!(!memory.delete(&tobin).unwrap());
}

#[test]
fn test_tombstone_keeps_relations_and_history() {
    let dir = TempDir::new().unwrap();
    let memory = sqlite_memory(&dir, "world.db");
    let mira = memory.store(character("s1", "Mira")).unwrap();
    let tobin = memory.store(character("s1", "Tobin")).unwrap();
    memory
        .add_relation(&Relation::new(mira.clone(), tobin.clone(), RelationType::Knows))
        .unwrap();

    assert!(memory.tombstone(&tobin).unwrap());
    assert!(memory.retrieve(&tobin).unwrap().is_none());
    assert!(
        memory
            .query(&EntityQuery::new().in_session("s1"))
            .unwrap()
            .iter()
            .all(|e| e.id != tobin)
    );
    assert_eq!(memory.get_related(&mira, None).unwrap().len(), 1);
    assert_eq!(memory.history(&tobin, 10).unwrap().len(), 1);

    assert!(memory.restore(&tobin).unwrap());
    assert!(memory.retrieve(&tobin).unwrap().is_some());
}

#[test]
fn test_data_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let id = {
        let memory = sqlite_memory(&dir, "world.db");
        memory.store(character("s1", "Mira")).unwrap()
    };
    let memory = sqlite_memory(&dir, "world.db");
    assert_eq!(
        memory.retrieve(&id).unwrap().unwrap().content_str("name"),
        Some("Mira")
    );
}

// ============================================================================
// Cache behaviour through the facade
// ============================================================================

#[test]
fn test_reading_past_capacity_evicts_least_recently_used() {
    let mut config = MemoryConfig::in_memory();
    config.cache.capacity = 3;
    let memory = MemoryFacade::from_config(&config).unwrap();
    let ids: Vec<EntityId> = (0..4)
        .map(|i| memory.store(character("s1", &format!("c{i}"))).unwrap())
        .collect();
    memory.cache().clear();

    for id in &ids {
        memory.retrieve(id).unwrap();
    }
    let before = memory.cache_stats();
    assert_eq!(before.misses, 4);
    assert!(!memory.cache().contains(&ids[0]));

    memory.retrieve(&ids[0]).unwrap();
    assert_eq!(memory.cache_stats().misses, 5);
    memory.retrieve(&ids[3]).unwrap();
    assert_eq!(memory.cache_stats().hits, before.hits + 1);
}

// ============================================================================
// Export / import
// ============================================================================

#[test]
fn test_export_import_round_trip_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let source = sqlite_memory(&dir, "source.db");
    let mira = source.store(character("s1", "Mira")).unwrap();
    let tobin = source.store(character("s1", "Tobin")).unwrap();
    let ghost = source.store(character("s1", "Ghost")).unwrap();
    source.tombstone(&ghost).unwrap();
    source
        .add_relation(&Relation::new(mira.clone(), tobin.clone(), RelationType::AlliedWith).with_strength(0.8))
        .unwrap();
    source
        .store_fact(
            &Fact::new("s1", "oath")
                .with_field("subject", json!("Mira"))
                .between(mira.clone(), tobin.clone())
                .with_association(EntityAssociation::new(mira.clone(), "swearer", 1.0)),
        )
        .unwrap();
    source
        .create_plotline(&Plotline::new("s1", "The Oath").with_priority(2))
        .unwrap();

    let snapshot = source.export(Some("s1")).unwrap();
    assert_eq!(snapshot.entities.len(), 3);

    // Through JSON, as the CLI does.
    let text = serde_json::to_string(&snapshot).unwrap();
    let parsed: world_memory::models::WorldSnapshot = serde_json::from_str(&text).unwrap();

    let target = sqlite_memory(&dir, "target.db");
    let first = target.import(&parsed).unwrap();
    let second = target.import(&parsed).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.entities, 3);
    assert_eq!(first.relations, 1);
    assert_eq!(first.facts, 1);
    assert_eq!(first.plotlines, 1);

    let round_trip = target.export(Some("s1")).unwrap();
    let mut expected = snapshot.entities.clone();
    let mut actual = round_trip.entities.clone();
    expected.sort_by(|a, b| a.entity.id.cmp(&b.entity.id));
    actual.sort_by(|a, b| a.entity.id.cmp(&b.entity.id));
    assert_eq!(actual, expected);
    assert_eq!(round_trip.relations, snapshot.relations);
    assert_eq!(round_trip.facts, snapshot.facts);
    assert_eq!(round_trip.plotlines, snapshot.plotlines);

    assert!(target.retrieve(&ghost).unwrap().is_none());
    assert_eq!(target.stats(Some("s1")).unwrap().total_entities, 2);
}

#[test]
fn test_import_rejects_newer_format() {
    let memory = MemoryFacade::from_config(&MemoryConfig::in_memory()).unwrap();
    let snapshot = world_memory::models::WorldSnapshot {
        format_version: 99,
        ..Default::default()
    };
    assert!(matches!(memory.import(&snapshot), Err(Error::InvalidInput(_))));
}

// ============================================================================
// Consistency scenarios
// ============================================================================

#[test]
fn test_three_events_ten_minutes_apart_conflict_pairwise() {
    let memory = MemoryFacade::from_config(&MemoryConfig::in_memory()).unwrap();
    let base = world_memory::now() - Duration::hours(2);
    for i in 0..3 {
        memory
            .store(
                Entity::new("s1", EntityType::Event)
                    .with_field("name", json!(format!("skirmish {i}")))
                    .with_created_at(base + Duration::minutes(10 * i)),
            )
            .unwrap();
    }

    let issues = memory.check_session("s1").unwrap();
    let temporal: Vec<_> = issues
        .iter()
        .filter(|i| i.issue_type == IssueType::TemporalConflict)
        .collect();
    assert_eq!(temporal.len(), 2);
    assert!(temporal.iter().all(|i| i.affected_entity_ids.len() == 2));
    assert!(temporal.iter().all(|i| i.severity == IssueSeverity::Medium));
}

#[test]
fn test_identical_entities_yield_one_duplicate_issue() {
    let memory = MemoryFacade::from_config(&MemoryConfig::in_memory()).unwrap();
    let a = Entity::new("s1", EntityType::Object).with_field("name", json!("Brass Key"));
    let b = Entity::new("s1", EntityType::Object).with_field("name", json!("Brass Key"));

    let issues = memory.check_consistency(&[a.clone(), b.clone()], &[]);
    let dupes: Vec<_> = issues
        .iter()
        .filter(|i| i.issue_type == IssueType::EntityDuplicate)
        .collect();
    assert_eq!(dupes.len(), 1);
    assert!(dupes[0].affects(&a.id) && dupes[0].affects(&b.id));

    // Re-checking does not duplicate registry entries.
    memory.check_consistency(&[a, b], &[]);
    assert_eq!(memory.issues().len(), issues.len());
}

#[test]
fn test_dangling_relation_is_high_severity_and_can_be_fatal() {
    let memory = MemoryFacade::from_config(&MemoryConfig::in_memory()).unwrap();
    let a = character("s1", "Mira");
    let relation = Relation::new(a.id.clone(), EntityId::new("missing"), RelationType::Knows);

    let issues = memory.check_consistency(&[a], &[relation]);
    let dangling = issues
        .iter()
        .find(|i| i.issue_type == IssueType::RelationshipInconsistency)
        .expect("dangling relation issue");
    assert_eq!(dangling.severity, IssueSeverity::High);
    assert!(matches!(
        ensure_consistent(&issues, IssueSeverity::High),
        Err(Error::Consistency { issues: 1, .. })
    ));
    assert!(ensure_consistent(&issues, IssueSeverity::Critical).is_ok());
}

#[test]
fn test_consistency_disabled_reports_nothing() {
    let mut config = MemoryConfig::in_memory();
    config.features.consistency = false;
    let memory = MemoryFacade::from_config(&config).unwrap();
    let a = character("s1", "Mira");
    let relation = Relation::new(a.id.clone(), EntityId::new("missing"), RelationType::Knows);
    assert!(memory.check_consistency(&[a], &[relation]).is_empty());
}

// ============================================================================
// Summaries
// ============================================================================

#[test]
fn test_time_based_summary_excludes_recent_days() {
    let memory = MemoryFacade::from_config(&MemoryConfig::in_memory()).unwrap();
    let now = world_memory::now();
    let mut ids = Vec::new();
    for day in 0..10 {
        let fact = Entity::new("s1", EntityType::Fact)
            .with_field("name", json!(format!("fact {day}")))
            .with_created_at(now - Duration::days(day) - Duration::hours(12));
        ids.push((day, memory.store(fact).unwrap()));
    }

    let summary = memory
        .summarize_with(
            "s1",
            None,
            &SummaryOptions::default().with_strategy(SummaryStrategy::TimeBased),
        )
        .unwrap()
        .expect("summary");

    assert_eq!(summary.original_entity_ids.len(), 7);
    for (day, id) in &ids {
        assert_eq!(summary.original_entity_ids.contains(id), *day >= 3, "day {day}");
    }
    assert!(summary.is_template());

    let stored = memory.get_summaries("s1", 10).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, summary.id);
}

#[test]
fn test_compact_is_gated_and_summarize_is_not() {
    let memory = MemoryFacade::from_config(&MemoryConfig::in_memory()).unwrap();
    for i in 0..3 {
        memory.store(character("s1", &format!("c{i}"))).unwrap();
    }
    assert!(memory.compact("s1").unwrap().is_none());
    let summary = memory
        .summarize_with(
            "s1",
            None,
            &SummaryOptions::default()
                .with_strategy(SummaryStrategy::ImportanceBased)
                .with_format(SummaryFormat::BulletPoints),
        )
        .unwrap();
    // Fresh characters score well above the default threshold.
    assert!(summary.is_some());
}

#[test]
fn test_extend_summary_persists_new_version() {
    let memory = MemoryFacade::from_config(&MemoryConfig::in_memory()).unwrap();
    let old = world_memory::now() - Duration::days(10);
    for i in 0..4 {
        memory
            .store(character("s1", &format!("c{i}")).with_created_at(old + Duration::hours(i)))
            .unwrap();
    }
    let first = memory
        .summarize_with(
            "s1",
            None,
            &SummaryOptions::default().with_strategy(SummaryStrategy::TimeBased),
        )
        .unwrap()
        .unwrap();

    let newcomer = character("s1", "Newcomer");
    memory.store(newcomer.clone()).unwrap();
    let second = memory.extend_summary(&first, &[newcomer.clone()]).unwrap().unwrap();

    assert_eq!(second.id, first.id);
    assert_eq!(second.version, first.version + 1);
    assert!(second.original_entity_ids.contains(&newcomer.id));
    assert!(second.summary_text.starts_with(&first.summary_text));
}

#[test]
fn test_summarizer_disabled_returns_none() {
    let mut config = MemoryConfig::in_memory();
    config.features.summarizer = false;
    let memory = MemoryFacade::from_config(&config).unwrap();
    memory.store(character("s1", "Mira")).unwrap();
    assert!(memory.summarize("s1", None).unwrap().is_none());
}

// ============================================================================
// Search, timeline, facts, plotlines
// ============================================================================

#[test]
fn test_search_without_vector_index_uses_keywords() {
    let mut config = MemoryConfig::in_memory();
    config.features = FeatureFlags::core();
    config.features.vector = false;
    let memory = MemoryFacade::from_config(&config).unwrap();
    assert!(memory.vector_index().is_none());

    let harbor = memory
        .store(
            Entity::new("s1", EntityType::Location)
                .with_field("name", json!("Iron Harbor"))
                .with_field("description", json!("smoke over the iron docks")),
        )
        .unwrap();
    memory.store(character("s1", "Mira")).unwrap();

    let hits = memory
        .semantic_search("iron docks", &VectorFilter::new().with_session("s1"), 5)
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, harbor);
}

#[test]
fn test_hybrid_search_deduplicates() {
    let memory = MemoryFacade::from_config(&MemoryConfig::in_memory()).unwrap();
    let mira = memory.store(character("s1", "Mira")).unwrap();
    memory.store(character("s1", "Tobin")).unwrap();

    let results = memory
        .hybrid_search("Mira", &EntityQuery::new().in_session("s1").with_keyword("Mira"), 10)
        .unwrap();
    assert_eq!(results.iter().filter(|e| e.id == mira).count(), 1);
    assert_eq!(results[0].id, mira);
}

#[test]
fn test_timeline_is_sorted_and_bounded() {
    let memory = MemoryFacade::from_config(&MemoryConfig::in_memory()).unwrap();
    let base = world_memory::now() - Duration::days(5);
    for offset in [3, 1, 4, 2] {
        memory
            .store(
                Entity::new("s1", EntityType::Event)
                    .with_field("name", json!(format!("event {offset}")))
                    .with_created_at(base + Duration::days(offset)),
            )
            .unwrap();
    }

    let all = memory.get_timeline(Some("s1"), None, None).unwrap();
    assert_eq!(all.len(), 4);
    assert!(all.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert!(all.iter().all(|e| (0.0..=1.0).contains(&e.importance)));

    let window = memory
        .get_timeline(
            Some("s1"),
            Some(base + Duration::days(2)),
            Some(base + Duration::days(3)),
        )
        .unwrap();
    assert_eq!(window.len(), 2);
}

#[test]
fn test_facts_and_plotlines_pass_through() {
    let memory = MemoryFacade::from_config(&MemoryConfig::in_memory()).unwrap();
    let mira = memory.store(character("s1", "Mira")).unwrap();
    memory
        .store_fact(
            &Fact::new("s1", "rumor")
                .with_field("text", json!("the harbor master lies"))
                .with_association(EntityAssociation::new(mira.clone(), "witness", 0.7)),
        )
        .unwrap();
    assert_eq!(memory.get_facts_for_entity(&mira).unwrap().len(), 1);
    assert_eq!(memory.get_facts("s1", 10).unwrap().len(), 1);

    let plot = Plotline::new("s1", "Smuggler's Debt");
    memory.create_plotline(&plot).unwrap();
    let updated = memory
        .update_plotline(
            &plot.id,
            PlotlineUpdate {
                status: Some(PlotlineStatus::Resolved),
                ..PlotlineUpdate::default()
            },
        )
        .unwrap()
        .unwrap();
    assert_eq!(updated.status, PlotlineStatus::Resolved);
    assert!(
        memory
            .get_plotlines("s1", Some(PlotlineStatus::Active))
            .unwrap()
            .is_empty()
    );
}

#[test]
fn test_explicit_store_wiring() {
    let store: Arc<dyn EntityStore> = Arc::new(InMemoryEntityStore::new());
    let memory = MemoryFacade::new(Arc::clone(&store), None, &MemoryConfig::in_memory());
    let id = memory.store(character("s1", "Mira")).unwrap();
    assert!(store.retrieve(&id).unwrap().is_some());
}
