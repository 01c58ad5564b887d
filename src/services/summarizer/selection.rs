//! Candidate selection and importance scoring.

// Scores are heuristics; f64 precision on counts is plenty.
#![allow(clippy::cast_precision_loss)]

use crate::config::SummaryConfig;
use crate::models::{Entity, EntityId, SummaryStrategy};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;

const TYPE_WEIGHT: f64 = 0.4;
const COMPLEXITY_WEIGHT: f64 = 0.3;
const RECENCY_WEIGHT: f64 = 0.3;

/// Days for recency to decay to `1/e`.
const RECENCY_DECAY_DAYS: f64 = 30.0;

/// Importance of an entity in `[0, 1]`.
///
/// A numeric `metadata.importance` wins outright (clamped). Otherwise a blend
/// of the type's narrative weight, how much content the entity carries, and
/// how recently it was touched.
#[must_use]
pub fn importance_score(entity: &Entity, now: DateTime<Utc>) -> f64 {
    if let Some(explicit) = entity.metadata.get("importance").and_then(serde_json::Value::as_f64) {
        return explicit.clamp(0.0, 1.0);
    }

    let field_part = (entity.content.len() as f64 / 8.0).min(1.0);
    let text_len: usize = entity
        .content
        .values()
        .map(|v| crate::models::value_text(v).chars().count())
        .sum();
    let text_part = (text_len as f64 / 500.0).min(1.0);
    let complexity = 0.5f64.mul_add(field_part, 0.5 * text_part);

    let age_days = (now - entity.updated_at).num_seconds().max(0) as f64 / 86_400.0;
    let recency = (-age_days / RECENCY_DECAY_DAYS).exp();

    let score = TYPE_WEIGHT.mul_add(
        entity.entity_type.importance_weight(),
        COMPLEXITY_WEIGHT.mul_add(complexity, RECENCY_WEIGHT * recency),
    );
    score.clamp(0.0, 1.0)
}

/// Applies a strategy, returning at most `max_entities_per_summary`
/// entities in chronological order.
#[must_use]
pub fn select(
    entities: &[Entity],
    strategy: SummaryStrategy,
    config: &SummaryConfig,
    now: DateTime<Utc>,
) -> Vec<Entity> {
    let mut selected = match strategy {
        SummaryStrategy::TimeBased => time_based(entities, config, now),
        SummaryStrategy::ImportanceBased => importance_based(entities, config, now),
        SummaryStrategy::RelevanceBased => relevance_based(entities, config),
        SummaryStrategy::Hybrid => {
            let mut union = time_based(entities, config, now);
            let mut seen: HashSet<EntityId> = union.iter().map(|e| e.id.clone()).collect();
            for entity in importance_based(entities, config, now) {
                if seen.insert(entity.id.clone()) {
                    union.push(entity);
                }
            }
            union
        },
    };
    chronological(&mut selected);
    selected.truncate(config.max_entities_per_summary);
    selected
}

fn chronological(entities: &mut [Entity]) {
    entities.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}

/// Oldest first, strictly older than `preserve_recent_days`. An entity created
/// exactly on the cutoff counts as recent and is kept out.
fn time_based(entities: &[Entity], config: &SummaryConfig, now: DateTime<Utc>) -> Vec<Entity> {
    let cutoff = now - Duration::days(i64::from(config.preserve_recent_days));
    let mut old: Vec<Entity> = entities
        .iter()
        .filter(|e| e.created_at < cutoff)
        .cloned()
        .collect();
    chronological(&mut old);
    old.truncate(config.max_entities_per_summary);
    old
}

fn importance_based(
    entities: &[Entity],
    config: &SummaryConfig,
    now: DateTime<Utc>,
) -> Vec<Entity> {
    let mut scored: Vec<(f64, &Entity)> = entities
        .iter()
        .map(|e| (importance_score(e, now), e))
        .filter(|(score, _)| *score >= config.importance_threshold)
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));
    scored
        .into_iter()
        .take(config.max_entities_per_summary)
        .map(|(_, e)| e.clone())
        .collect()
}

/// Splits the timeline wherever consecutive entities are more than the
/// cluster window apart and keeps the largest cluster (earliest on ties).
fn relevance_based(entities: &[Entity], config: &SummaryConfig) -> Vec<Entity> {
    let mut sorted = entities.to_vec();
    chronological(&mut sorted);
    let window = Duration::hours(i64::from(config.cluster_window_hours));

    let mut best: &[Entity] = &[];
    let mut start = 0;
    for i in 1..=sorted.len() {
        let boundary = i == sorted.len() || sorted[i].created_at - sorted[i - 1].created_at > window;
        if boundary {
            if i - start > best.len() {
                best = &sorted[start..i];
            }
            start = i;
        }
    }
    best.to_vec()
}

/// True once there are enough entities and either the count or the time
/// span crosses its threshold.
#[must_use]
pub fn should_summarize(entities: &[Entity], config: &SummaryConfig) -> bool {
    let count = entities.len();
    if count == 0 || count < config.min_entities_to_summarize {
        return false;
    }
    if count >= config.max_entities_per_summary {
        return true;
    }
    let earliest = entities.iter().map(|e| e.created_at).min();
    let latest = entities.iter().map(|e| e.created_at).max();
    match (earliest, latest) {
        (Some(first), Some(last)) => {
            last - first >= Duration::days(i64::from(config.summary_interval_days))
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityType;
    use serde_json::json;
    use test_case::test_case;

    fn now() -> DateTime<Utc> {
        crate::from_millis(1_700_000_000_000)
    }

    fn fact_days_ago(days: i64) -> Entity {
        Entity::new("s1", EntityType::Fact)
            .with_field("text", json!(format!("fact from {days} days ago")))
            .with_created_at(now() - Duration::days(days))
    }

    #[test]
    fn test_time_based_preserves_recent_days() {
        let facts: Vec<Entity> = (0..10).map(fact_days_ago).collect();
        let config = SummaryConfig {
            preserve_recent_days: 3,
            max_entities_per_summary: 50,
            ..SummaryConfig::default()
        };
        let selected = select(&facts, SummaryStrategy::TimeBased, &config, now());
        // Days 4..=9; the fact sitting on the cutoff is still recent.
        assert_eq!(selected.len(), 6);
        let cutoff = now() - Duration::days(3);
        assert!(selected.iter().all(|e| e.created_at < cutoff));
        assert!(selected.iter().all(|e| e.id != facts[3].id));
        assert!(selected.windows(2).all(|w| w[0].created_at <= w[1].created_at));

        let capped = SummaryConfig {
            max_entities_per_summary: 4,
            ..config
        };
        assert_eq!(select(&facts, SummaryStrategy::TimeBased, &capped, now()).len(), 4);
    }

    #[test]
    fn test_metadata_override_wins() {
        let e = Entity::new("s1", EntityType::Style).with_metadata("importance", json!(0.95));
        assert!((importance_score(&e, now()) - 0.95).abs() < f64::EPSILON);
        let clamped = Entity::new("s1", EntityType::Style).with_metadata("importance", json!(7));
        assert!((importance_score(&clamped, now()) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_importance_prefers_weighty_recent_entities() {
        let plot = Entity::new("s1", EntityType::Plotline)
            .with_field("title", json!("The Heist"))
            .with_field("description", json!("a".repeat(400)))
            .with_created_at(now());
        let stale_style = Entity::new("s1", EntityType::Style)
            .with_field("tone", json!("grim"))
            .with_created_at(now() - Duration::days(365));
        assert!(importance_score(&plot, now()) > importance_score(&stale_style, now()));

        let config = SummaryConfig {
            importance_threshold: 0.6,
            ..SummaryConfig::default()
        };
        let selected = select(
            &[plot.clone(), stale_style],
            SummaryStrategy::ImportanceBased,
            &config,
            now(),
        );
        assert_eq!(selected, vec![plot]);
    }

    #[test]
    fn test_relevance_picks_largest_cluster() {
        let mut entities: Vec<Entity> = [40, 39, 10, 10, 9].into_iter().map(fact_days_ago).collect();
        let late = fact_days_ago(9);
        let shifted = late.created_at + Duration::hours(1);
        entities.push(late.with_created_at(shifted));
        let selected = select(
            &entities,
            SummaryStrategy::RelevanceBased,
            &SummaryConfig::default(),
            now(),
        );
        assert_eq!(selected.len(), 4);
        assert!(selected.iter().all(|e| e.created_at > now() - Duration::days(11)));
    }

    #[test]
    fn test_hybrid_is_deduplicated_union() {
        let mut facts: Vec<Entity> = (0..6).map(fact_days_ago).collect();
        facts[5].metadata.insert("importance".to_string(), json!(1.0));
        facts[0].metadata.insert("importance".to_string(), json!(1.0));
        let config = SummaryConfig {
            preserve_recent_days: 3,
            importance_threshold: 0.9,
            ..SummaryConfig::default()
        };
        let selected = select(&facts, SummaryStrategy::Hybrid, &config, now());
        let ids: HashSet<&EntityId> = selected.iter().map(|e| &e.id).collect();
        assert_eq!(ids.len(), selected.len());
        assert_eq!(selected.len(), 3);
        assert!(ids.contains(&facts[0].id));
    }

    #[test_case(5, 0, false ; "below minimum")]
    #[test_case(10, 1, false ; "enough entities but short span")]
    #[test_case(10, 8, true ; "span crosses interval")]
    #[test_case(50, 0, true ; "count crosses maximum")]
    fn test_should_summarize(count: usize, span_days: i64, expected: bool) {
        let entities: Vec<Entity> = (0..count)
            .map(|i| {
                let days = if i == 0 { span_days } else { 0 };
                fact_days_ago(days)
            })
            .collect();
        assert_eq!(should_summarize(&entities, &SummaryConfig::default()), expected);
    }
}
