//! Benchmarks for the consistency checker.
//!
//! Every rule is linear or `n log n` in the snapshot size, so full checks
//! over 10,000 entities should stay in the tens of milliseconds.

// Criterion macros generate items without docs - this is expected for benchmarks
// Benchmarks use expect/unwrap for simplicity - panics are acceptable in benchmarks
#![allow(missing_docs)]
#![allow(clippy::expect_used, clippy::unwrap_used)]

use chrono::Duration;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use serde_json::json;
use std::hint::black_box;
use world_memory::models::{Entity, EntityType, Relation, RelationType};
use world_memory::services::{ConsistencyCheck, DuplicateCheck, TemporalCheck};
use world_memory::ConsistencyChecker;

/// Builds a session snapshot with a sprinkling of duplicates and dangling relations.
fn snapshot(size: usize) -> (Vec<Entity>, Vec<Relation>) {
    let base = world_memory::now() - Duration::days(365);
    let types = [
        EntityType::Character,
        EntityType::Location,
        EntityType::Event,
        EntityType::Fact,
    ];
    let entities: Vec<Entity> = (0..size)
        .map(|i| {
            // Every 50th entity repeats its neighbour's content.
            let label = if i % 50 == 1 { i - 1 } else { i };
            Entity::new("bench", types[i % types.len()])
                .with_field("name", json!(format!("entity {label}")))
                .with_field("status", json!(if i % 97 == 0 { "dead" } else { "alive" }))
                .with_created_at(base + Duration::minutes(i as i64 * 37))
        })
        .collect();
    let relations = entities
        .windows(2)
        .enumerate()
        .map(|(i, pair)| {
            let target = if i % 100 == 0 {
                world_memory::EntityId::new(format!("missing-{i}"))
            } else {
                pair[1].id.clone()
            };
            Relation::new(pair[0].id.clone(), target, RelationType::RelatedTo)
        })
        .collect();
    (entities, relations)
}

fn bench_full_check(c: &mut Criterion) {
    let mut group = c.benchmark_group("consistency_full_check");
    let checker = ConsistencyChecker::default();
    for size in [100, 1_000, 10_000] {
        let (entities, relations) = snapshot(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| black_box(checker.check(&entities, &relations)));
        });
    }
    group.finish();
}

fn bench_single_rules(c: &mut Criterion) {
    let (entities, relations) = snapshot(5_000);
    let mut group = c.benchmark_group("consistency_rules");
    group.bench_function("duplicates", |b| {
        b.iter(|| black_box(DuplicateCheck.check(&entities, &relations)));
    });
    let temporal = TemporalCheck::default();
    group.bench_function("temporal", |b| {
        b.iter(|| black_box(temporal.check(&entities, &relations)));
    });
    group.finish();
}

criterion_group!(benches, bench_full_check, bench_single_rules);
criterion_main!(benches);
