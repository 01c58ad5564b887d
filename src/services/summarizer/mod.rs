//! Summarization: select candidate entities, generate text, cache the result.
//!
//! The summarizer is advisory. It never returns an error: when selection
//! comes up empty it returns `None`, and when the LLM fails it falls back to
//! the deterministic [`TemplateGenerator`], recording that on the summary.

mod generator;
mod selection;

pub use generator::{LlmTextGenerator, TemplateGenerator, TextGenerator};
pub use selection::{importance_score, select, should_summarize};

use crate::cache::TtlLruCache;
use crate::config::SummaryConfig;
use crate::llm::LlmProvider;
use crate::models::{
    CoveragePeriod, Entity, EntityId, GeneratedBy, MemorySummary, SummaryFormat, SummaryStrategy,
};
use crate::storage::sqlite::acquire_lock;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::instrument;

/// Per-call overrides for strategy, format and focus.
#[derive(Debug, Clone, Default)]
pub struct SummaryOptions {
    /// Selection strategy. `None` uses the configured one.
    pub strategy: Option<SummaryStrategy>,
    /// Output format. `None` uses the configured one.
    pub format: Option<SummaryFormat>,
    /// Free-text focus passed to the generator and folded into the cache key.
    pub context: Option<String>,
}

impl SummaryOptions {
    /// Sets the strategy.
    #[must_use]
    pub const fn with_strategy(mut self, strategy: SummaryStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Sets the format.
    #[must_use]
    pub const fn with_format(mut self, format: SummaryFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Sets the focus context.
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// Multi-strategy summarizer with a TTL-bounded result cache.
pub struct Summarizer {
    config: SummaryConfig,
    generator: Option<Arc<dyn TextGenerator>>,
    fallback: TemplateGenerator,
    cache: Mutex<TtlLruCache<String, MemorySummary>>,
}

impl Summarizer {
    /// Creates a template-only summarizer.
    #[must_use]
    pub fn new(config: SummaryConfig) -> Self {
        let cache = TtlLruCache::new(
            config.cache_capacity,
            Some(Duration::from_secs(config.cache_ttl_secs)),
        );
        Self {
            config,
            generator: None,
            fallback: TemplateGenerator,
            cache: Mutex::new(cache),
        }
    }

    /// Uses an LLM for generation, keeping the template as fallback.
    #[must_use]
    pub fn with_llm(self, provider: Arc<dyn LlmProvider>) -> Self {
        self.with_generator(Arc::new(LlmTextGenerator::new(provider)))
    }

    /// Uses a custom primary generator.
    #[must_use]
    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &SummaryConfig {
        &self.config
    }

    /// Returns true if a primary generator is configured.
    #[must_use]
    pub fn has_generator(&self) -> bool {
        self.generator.is_some()
    }

    /// See [`should_summarize`].
    #[must_use]
    pub fn should_summarize(&self, entities: &[Entity]) -> bool {
        should_summarize(entities, &self.config)
    }

    /// Selects candidates with `strategy` relative to the current time.
    #[must_use]
    pub fn select_entities(&self, entities: &[Entity], strategy: SummaryStrategy) -> Vec<Entity> {
        select(entities, strategy, &self.config, crate::now())
    }

    /// Number of cached summaries, including expired ones not yet purged.
    #[must_use]
    pub fn cache_len(&self) -> usize {
        acquire_lock(&self.cache).len()
    }

    /// Drops every cached summary.
    pub fn clear_cache(&self) {
        acquire_lock(&self.cache).clear();
    }

    /// Summarizes with the configured strategy and format.
    pub fn summarize(&self, session_id: &str, entities: &[Entity]) -> Option<MemorySummary> {
        self.summarize_with(session_id, entities, &SummaryOptions::default())
    }

    /// Summarizes with per-call options. Returns `None` if nothing is selected.
    #[instrument(
        skip(self, entities, options),
        fields(operation = "summarize", session_id = %session_id, candidates = entities.len())
    )]
    pub fn summarize_with(
        &self,
        session_id: &str,
        entities: &[Entity],
        options: &SummaryOptions,
    ) -> Option<MemorySummary> {
        let strategy = options.strategy.unwrap_or(self.config.strategy);
        let format = options.format.unwrap_or(self.config.format);
        let context = options.context.as_deref();

        let selected = self.select_entities(entities, strategy);
        if selected.is_empty() {
            tracing::debug!(strategy = %strategy, "No entities selected for summary");
            return None;
        }

        let key = cache_key(&selected, context, strategy, format);
        // Peek keeps insertion order, so eviction is oldest-first.
        if let Some(hit) = acquire_lock(&self.cache).peek(&key).cloned() {
            metrics::counter!("cache_hits_total", "cache" => "summary").increment(1);
            return Some(hit);
        }
        metrics::counter!("cache_misses_total", "cache" => "summary").increment(1);

        let (text, generated_by) = self.generate_text(&selected, format, context)?;
        let summary = build_summary(session_id, text, &selected, format, generated_by);
        acquire_lock(&self.cache).put(key, summary.clone());
        Some(summary)
    }

    /// Extends `previous` with `new_entities`.
    ///
    /// `covered` holds the entities `previous` was built from, resolved by the
    /// caller. If the generator cannot extend the text, the summary is
    /// regenerated over `covered` plus `new_entities`.
    #[instrument(
        skip(self, previous, new_entities, covered),
        fields(operation = "update_summary", summary_id = %previous.id, new = new_entities.len())
    )]
    pub fn update_summary(
        &self,
        previous: &MemorySummary,
        new_entities: &[Entity],
        covered: &[Entity],
    ) -> Option<MemorySummary> {
        if new_entities.is_empty() {
            return Some(previous.clone());
        }

        let mut all: Vec<Entity> = covered.to_vec();
        let mut seen: HashSet<EntityId> = all.iter().map(|e| e.id.clone()).collect();
        seen.extend(previous.original_entity_ids.iter().cloned());
        all.extend(
            new_entities
                .iter()
                .filter(|e| !seen.contains(&e.id))
                .cloned(),
        );
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let extended = match &self.generator {
            Some(generator) => match generator.extend(previous, new_entities) {
                Ok(text) => Some((text, generator.generated_by())),
                Err(e) => {
                    tracing::warn!(error = %e, "Incremental summary failed, regenerating");
                    None
                },
            },
            None => self
                .fallback
                .extend(previous, new_entities)
                .ok()
                .map(|text| (text, GeneratedBy::Template)),
        };
        let (text, generated_by) = match extended {
            Some(done) => done,
            None => self.generate_text(&all, previous.format, None)?,
        };

        let mut summary = build_summary(&previous.session_id, text, &all, previous.format, generated_by);
        let mut ids = previous.original_entity_ids.clone();
        for entity in new_entities {
            if !ids.contains(&entity.id) {
                ids.push(entity.id.clone());
            }
        }
        summary.original_entity_ids = ids;
        summary.coverage_period.start = summary.coverage_period.start.min(previous.coverage_period.start);
        summary.coverage_period.end = summary.coverage_period.end.max(previous.coverage_period.end);
        for (id, score) in &previous.importance_scores {
            summary.importance_scores.entry(id.clone()).or_insert(*score);
        }
        summary.id.clone_from(&previous.id);
        summary.version = previous.version + 1;
        Some(summary)
    }

    fn generate_text(
        &self,
        entities: &[Entity],
        format: SummaryFormat,
        context: Option<&str>,
    ) -> Option<(String, GeneratedBy)> {
        let start = Instant::now();
        if let Some(generator) = &self.generator {
            match generator.generate(entities, format, context) {
                Ok(text) if !text.is_empty() => {
                    let generated_by = generator.generated_by();
                    record_generation(generated_by, format, start);
                    return Some((text, generated_by));
                },
                Ok(_) => tracing::warn!("Generator returned empty text, using template"),
                Err(e) => tracing::warn!(error = %e, "Summary generation failed, using template"),
            }
            metrics::counter!("summary_fallbacks_total").increment(1);
        }

        match self.fallback.generate(entities, format, context) {
            Ok(text) => {
                record_generation(GeneratedBy::Template, format, start);
                Some((text, GeneratedBy::Template))
            },
            Err(e) => {
                tracing::error!(error = %e, "Template summary failed, skipping compaction");
                None
            },
        }
    }
}

fn record_generation(generated_by: GeneratedBy, format: SummaryFormat, start: Instant) {
    metrics::counter!(
        "summaries_generated_total",
        "generated_by" => generated_by.as_str(),
        "format" => format.as_str()
    )
    .increment(1);
    metrics::histogram!("summary_generation_duration_ms")
        .record(start.elapsed().as_secs_f64() * 1000.0);
}

fn cache_key(
    entities: &[Entity],
    context: Option<&str>,
    strategy: SummaryStrategy,
    format: SummaryFormat,
) -> String {
    let mut ids: Vec<&str> = entities.iter().map(|e| e.id.as_str()).collect();
    ids.sort_unstable();
    let mut hasher = Sha256::new();
    for id in ids {
        hasher.update(id.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update([1u8]);
    hasher.update(context.unwrap_or_default().as_bytes());
    hasher.update([1u8]);
    hasher.update(strategy.as_str().as_bytes());
    hasher.update([1u8]);
    hasher.update(format.as_str().as_bytes());
    hex::encode(hasher.finalize())
}

fn build_summary(
    session_id: &str,
    summary_text: String,
    entities: &[Entity],
    format: SummaryFormat,
    generated_by: GeneratedBy,
) -> MemorySummary {
    let now = crate::now();
    let start = entities.iter().map(|e| e.created_at).min().unwrap_or(now);
    let end = entities.iter().map(|e| e.created_at).max().unwrap_or(now);
    let importance_scores: HashMap<EntityId, f64> = entities
        .iter()
        .map(|e| (e.id.clone(), importance_score(e, now)))
        .collect();
    MemorySummary {
        id: uuid::Uuid::now_v7().to_string(),
        session_id: session_id.to_string(),
        summary_text,
        original_entity_ids: entities.iter().map(|e| e.id.clone()).collect(),
        coverage_period: CoveragePeriod { start, end },
        importance_scores,
        format,
        version: 1,
        generated_by,
        created_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityType;
    use crate::{Error, Result};
    use chrono::Duration as ChronoDuration;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn facts(n: i64) -> Vec<Entity> {
        (0..n)
            .map(|i| {
                Entity::new("s1", EntityType::Fact)
                    .with_field("name", json!(format!("fact {i}")))
                    .with_created_at(
                        crate::now() - ChronoDuration::days(10 - i) + ChronoDuration::hours(12),
                    )
            })
            .collect()
    }

    fn config() -> SummaryConfig {
        SummaryConfig {
            strategy: SummaryStrategy::TimeBased,
            preserve_recent_days: 3,
            ..SummaryConfig::default()
        }
    }

    struct Failing {
        calls: AtomicUsize,
    }

    impl TextGenerator for Failing {
        fn generated_by(&self) -> GeneratedBy {
            GeneratedBy::Llm
        }

        fn generate(&self, _: &[Entity], _: SummaryFormat, _: Option<&str>) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::generation("generate", "model offline"))
        }

        fn extend(&self, _: &MemorySummary, _: &[Entity]) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::generation("extend", "model offline"))
        }
    }

    #[test]
    fn test_summary_covers_selected_entities_only() {
        let summarizer = Summarizer::new(config());
        let entities = facts(10);
        let summary = summarizer.summarize("s1", &entities).unwrap();
        assert!(summary.is_template());
        assert_eq!(summary.version, 1);
        assert_eq!(summary.original_entity_ids.len(), 7);
        assert!(!summary.original_entity_ids.contains(&entities[9].id));
        assert!(summary.coverage_period.start <= summary.coverage_period.end);
        assert_eq!(
            summary.importance_scores.len(),
            summary.original_entity_ids.len()
        );
    }

    #[test]
    fn test_nothing_selected_returns_none() {
        let summarizer = Summarizer::new(config());
        let recent = vec![Entity::new("s1", EntityType::Fact)];
        assert!(summarizer.summarize("s1", &recent).is_none());
    }

    #[test]
    fn test_cache_hit_returns_same_summary() {
        let summarizer = Summarizer::new(config());
        let entities = facts(10);
        let first = summarizer.summarize("s1", &entities).unwrap();
        let second = summarizer.summarize("s1", &entities).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(summarizer.cache_len(), 1);

        let bullets = summarizer
            .summarize_with(
                "s1",
                &entities,
                &SummaryOptions::default().with_format(SummaryFormat::BulletPoints),
            )
            .unwrap();
        assert_ne!(bullets.id, first.id);
        assert_eq!(summarizer.cache_len(), 2);
    }

    #[test]
    fn test_cache_evicts_oldest_first() {
        let summarizer = Summarizer::new(SummaryConfig {
            cache_capacity: 2,
            ..config()
        });
        let entities = facts(10);
        let options = |ctx: &str| SummaryOptions::default().with_context(ctx);
        let a = summarizer.summarize_with("s1", &entities, &options("a")).unwrap();
        summarizer.summarize_with("s1", &entities, &options("b")).unwrap();
        // Reading "a" again does not refresh it.
        summarizer.summarize_with("s1", &entities, &options("a")).unwrap();
        summarizer.summarize_with("s1", &entities, &options("c")).unwrap();
        let again = summarizer.summarize_with("s1", &entities, &options("a")).unwrap();
        assert_ne!(again.id, a.id);
    }

    #[test]
    fn test_failing_generator_falls_back_to_template() {
        let failing = Arc::new(Failing {
            calls: AtomicUsize::new(0),
        });
        let summarizer = Summarizer::new(config()).with_generator(failing.clone());
        let summary = summarizer.summarize("s1", &facts(10)).unwrap();
        assert!(summary.is_template());
        assert!(!summary.summary_text.is_empty());
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_incremental_update_extends_template_text() {
        let summarizer = Summarizer::new(config());
        let entities = facts(10);
        let previous = summarizer.summarize("s1", &entities).unwrap();
        let new_fact = Entity::new("s1", EntityType::Fact).with_field("name", json!("the bridge fell"));

        let updated = summarizer
            .update_summary(&previous, std::slice::from_ref(&new_fact), &entities[..7])
            .unwrap();
        assert_eq!(updated.id, previous.id);
        assert_eq!(updated.version, 2);
        assert!(updated.summary_text.starts_with(&previous.summary_text));
        assert!(updated.summary_text.contains("the bridge fell"));
        assert!(updated.original_entity_ids.contains(&new_fact.id));
        assert_eq!(
            updated.original_entity_ids.len(),
            previous.original_entity_ids.len() + 1
        );
    }

    #[test]
    fn test_incremental_failure_regenerates_over_union() {
        let failing = Arc::new(Failing {
            calls: AtomicUsize::new(0),
        });
        let summarizer = Summarizer::new(config()).with_generator(failing.clone());
        let entities = facts(10);
        let previous = summarizer.summarize("s1", &entities).unwrap();
        let new_fact = Entity::new("s1", EntityType::Fact).with_field("name", json!("the bridge fell"));

        let updated = summarizer
            .update_summary(&previous, std::slice::from_ref(&new_fact), &entities[..7])
            .unwrap();
        // extend, then generate during regeneration
        assert_eq!(failing.calls.load(Ordering::SeqCst), 3);
        assert!(updated.is_template());
        assert!(updated.summary_text.contains("the bridge fell"));
        assert!(!updated.summary_text.starts_with(&previous.summary_text));
    }
}
