//! Summary text generation backends.

use crate::Result;
use crate::llm::LlmProvider;
use crate::models::{Entity, EntityType, GeneratedBy, MemorySummary, SummaryFormat};
use std::fmt::Write as _;
use std::sync::Arc;

/// Longest per-entity line handed to a generator.
const LINE_CHARS: usize = 160;

/// Produces summary text from a snapshot of entities.
pub trait TextGenerator: Send + Sync {
    /// Which kind of backend this is, recorded on each summary.
    fn generated_by(&self) -> GeneratedBy;

    /// Writes a summary of `entities` in `format`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Generation`] if the backend fails.
    fn generate(
        &self,
        entities: &[Entity],
        format: SummaryFormat,
        context: Option<&str>,
    ) -> Result<String>;

    /// Extends `previous` with `new_entities` without rewriting it from scratch.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Generation`] if the backend fails.
    fn extend(&self, previous: &MemorySummary, new_entities: &[Entity]) -> Result<String>;
}

fn entity_line(entity: &Entity) -> String {
    format!(
        "[{}] {} ({})",
        entity.created_at.format("%Y-%m-%d %H:%M"),
        entity.content_summary(LINE_CHARS),
        entity.entity_type
    )
}

// ============================================================================
// Template
// ============================================================================

/// Deterministic fallback used when no LLM is configured or the LLM fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateGenerator;

impl TemplateGenerator {
    fn names_of(entities: &[Entity], types: &[EntityType]) -> Vec<String> {
        entities
            .iter()
            .filter(|e| types.contains(&e.entity_type))
            .map(|e| e.content_summary(LINE_CHARS))
            .collect()
    }

    fn text(entities: &[Entity], context: Option<&str>) -> String {
        let mut out = String::new();
        if let (Some(first), Some(last)) = (entities.first(), entities.last()) {
            let _ = write!(
                out,
                "{} records between {} and {}.",
                entities.len(),
                first.created_at.format("%Y-%m-%d"),
                last.created_at.format("%Y-%m-%d")
            );
        }
        if let Some(context) = context {
            let _ = write!(out, " Context: {context}.");
        }
        for entity_type in EntityType::all() {
            let names = Self::names_of(entities, &[*entity_type]);
            if !names.is_empty() {
                let _ = write!(out, " {}: {}.", capitalized(entity_type.as_str()), names.join("; "));
            }
        }
        out
    }

    fn structured(entities: &[Entity], context: Option<&str>) -> String {
        let sections: [(&str, &[EntityType]); 4] = [
            ("Timeline", &[EntityType::Event]),
            ("Characters", &[EntityType::Character, EntityType::Relationship]),
            ("Locations", &[EntityType::Location]),
            (
                "Plot",
                &[EntityType::Plotline, EntityType::Fact, EntityType::Object, EntityType::Concept],
            ),
        ];
        let mut out = String::new();
        if let Some(context) = context {
            let _ = writeln!(out, "Context: {context}\n");
        }
        for (title, types) in sections {
            let lines = Self::names_of(entities, types);
            if lines.is_empty() {
                continue;
            }
            let _ = writeln!(out, "## {title}");
            for line in lines {
                let _ = writeln!(out, "- {line}");
            }
            out.push('\n');
        }
        out.trim_end().to_string()
    }

    fn timeline(entities: &[Entity]) -> String {
        entities
            .iter()
            .map(entity_line)
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn bullets(entities: &[Entity]) -> String {
        entities
            .iter()
            .map(|e| format!("- {} ({})", e.content_summary(LINE_CHARS), e.entity_type))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn capitalized(s: &str) -> String {
    let mut chars = s.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect::<String>() + "s"
    })
}

impl TextGenerator for TemplateGenerator {
    fn generated_by(&self) -> GeneratedBy {
        GeneratedBy::Template
    }

    fn generate(
        &self,
        entities: &[Entity],
        format: SummaryFormat,
        context: Option<&str>,
    ) -> Result<String> {
        Ok(match format {
            SummaryFormat::Text => Self::text(entities, context),
            SummaryFormat::Structured => Self::structured(entities, context),
            SummaryFormat::Timeline => Self::timeline(entities),
            SummaryFormat::BulletPoints => Self::bullets(entities),
        })
    }

    fn extend(&self, previous: &MemorySummary, new_entities: &[Entity]) -> Result<String> {
        let addition = self.generate(new_entities, previous.format, None)?;
        Ok(format!("{}\n\n{addition}", previous.summary_text))
    }
}

// ============================================================================
// LLM
// ============================================================================

const SYSTEM_PROMPT: &str = "You maintain the long-term memory of an interactive story. \
Compress the world records you are given into a faithful summary. \
Keep names, causes and consequences. Never invent facts that are not in the records.";

/// Generator backed by an [`LlmProvider`].
pub struct LlmTextGenerator {
    provider: Arc<dyn LlmProvider>,
}

impl LlmTextGenerator {
    /// Wraps a provider.
    #[must_use]
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }

    /// The provider name.
    #[must_use]
    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    fn format_instruction(format: SummaryFormat) -> &'static str {
        match format {
            SummaryFormat::Text => "Write one or two plain prose paragraphs.",
            SummaryFormat::Structured => {
                "Use the markdown sections '## Timeline', '## Characters', '## Locations' and '## Plot'. Omit empty sections."
            },
            SummaryFormat::Timeline => {
                "Write a chronological list, one line per moment, each starting with its date."
            },
            SummaryFormat::BulletPoints => "Write concise bullet points starting with '- '.",
        }
    }

    fn records(entities: &[Entity]) -> String {
        entities
            .iter()
            .map(entity_line)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl TextGenerator for LlmTextGenerator {
    fn generated_by(&self) -> GeneratedBy {
        GeneratedBy::Llm
    }

    fn generate(
        &self,
        entities: &[Entity],
        format: SummaryFormat,
        context: Option<&str>,
    ) -> Result<String> {
        let mut prompt = format!("{}\n\n", Self::format_instruction(format));
        if let Some(context) = context {
            let _ = writeln!(prompt, "Focus: {context}\n");
        }
        let _ = write!(prompt, "Records:\n{}", Self::records(entities));
        let text = self.provider.complete_with_system(SYSTEM_PROMPT, &prompt)?;
        Ok(text.trim().to_string())
    }

    fn extend(&self, previous: &MemorySummary, new_entities: &[Entity]) -> Result<String> {
        let prompt = format!(
            "{}\n\nExtend the existing summary with the new records. Keep everything \
             that is still true, and return the complete updated summary.\n\n\
             Existing summary:\n{}\n\nNew records:\n{}",
            Self::format_instruction(previous.format),
            previous.summary_text,
            Self::records(new_entities)
        );
        let text = self.provider.complete_with_system(SYSTEM_PROMPT, &prompt)?;
        Ok(text.trim().to_string())
    }
}
