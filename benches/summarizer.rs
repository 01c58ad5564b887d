//! Benchmarks for summary selection and template generation.

// Criterion macros generate items without docs - this is expected for benchmarks
// Benchmarks use expect/unwrap for simplicity - panics are acceptable in benchmarks
#![allow(missing_docs)]
#![allow(clippy::expect_used, clippy::unwrap_used)]

use chrono::Duration;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use serde_json::json;
use std::hint::black_box;
use world_memory::config::SummaryConfig;
use world_memory::models::{Entity, EntityType, SummaryFormat, SummaryStrategy};
use world_memory::services::SummaryOptions;
use world_memory::Summarizer;

fn history(size: usize) -> Vec<Entity> {
    let base = world_memory::now() - Duration::days(60);
    (0..size)
        .map(|i| {
            Entity::new("bench", EntityType::all()[i % EntityType::all().len()])
                .with_field("name", json!(format!("record {i}")))
                .with_field("description", json!("a long-running thread of the story"))
                .with_created_at(base + Duration::hours(i as i64 * 3))
        })
        .collect()
}

fn bench_selection(c: &mut Criterion) {
    let summarizer = Summarizer::new(SummaryConfig::default());
    let entities = history(2_000);
    let mut group = c.benchmark_group("summary_selection");
    for strategy in [
        SummaryStrategy::TimeBased,
        SummaryStrategy::ImportanceBased,
        SummaryStrategy::RelevanceBased,
        SummaryStrategy::Hybrid,
    ] {
        group.bench_with_input(
            BenchmarkId::from_parameter(strategy.as_str()),
            &strategy,
            |b, strategy| b.iter(|| black_box(summarizer.select_entities(&entities, *strategy))),
        );
    }
    group.finish();
}

fn bench_generation(c: &mut Criterion) {
    let entities = history(500);
    let mut group = c.benchmark_group("summary_generation");
    for format in [SummaryFormat::Text, SummaryFormat::Structured, SummaryFormat::Timeline] {
        // A fresh summarizer per iteration keeps the result cache out of the measurement.
        group.bench_function(format.as_str(), |b| {
            b.iter(|| {
                let summarizer = Summarizer::new(SummaryConfig::default());
                let options = SummaryOptions::default()
                    .with_strategy(SummaryStrategy::TimeBased)
                    .with_format(format);
                black_box(summarizer.summarize_with("bench", &entities, &options))
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_selection, bench_generation);
criterion_main!(benches);
