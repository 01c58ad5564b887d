//! Per-component configuration sections.
//!
//! Each section deserializes with defaults for any missing key, so a config
//! file only needs to name what it changes.

use crate::models::{SummaryFormat, SummaryStrategy};
use crate::storage::resilience::ResilienceConfig;
use secrecy::SecretString;
use serde::Deserialize;
use std::path::PathBuf;

/// Structured store location.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// `SQLite` database file. `None` keeps everything in process memory.
    pub path: Option<PathBuf>,
}

/// Vector index backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackendKind {
    /// Brute-force, in process.
    #[default]
    Memory,
    /// Redis Stack / `RediSearch`.
    Redis,
    /// PostgreSQL with pgvector.
    Pgvector,
}

impl VectorBackendKind {
    /// Parses a backend name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "memory" | "in_memory" | "in-memory" => Some(Self::Memory),
            "redis" => Some(Self::Redis),
            "pgvector" | "postgres" | "postgresql" => Some(Self::Pgvector),
            _ => None,
        }
    }
}

/// Vector index settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    /// Which backend to use.
    pub backend: VectorBackendKind,
    /// Connection URL for external backends.
    pub url: Option<String>,
    /// Redis index name or pgvector table name.
    pub index_name: String,
    /// Maximum pooled connections for pgvector.
    pub pool_size: usize,
    /// Circuit breaker tuning for external backends.
    pub resilience: ResilienceConfig,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            backend: VectorBackendKind::Memory,
            url: None,
            index_name: "world_memory_vectors".to_string(),
            pool_size: 4,
            resilience: ResilienceConfig::default(),
        }
    }
}

/// Embedding provider selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    /// Deterministic token hashing.
    #[default]
    Hash,
    /// ONNX sentence embeddings.
    Fastembed,
}

impl EmbeddingProviderKind {
    /// Parses a provider name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "hash" => Some(Self::Hash),
            "fastembed" => Some(Self::Fastembed),
            _ => None,
        }
    }
}

/// Embedding settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Provider.
    pub provider: EmbeddingProviderKind,
    /// Model name for `fastembed`.
    pub model: String,
    /// Width of hash embeddings. `fastembed` models fix their own width.
    pub dimensions: usize,
    /// Cached embeddings, keyed by content hash.
    pub cache_capacity: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::Hash,
            model: "all-MiniLM-L6-v2".to_string(),
            dimensions: crate::embedding::DEFAULT_DIMENSIONS,
            cache_capacity: 1024,
        }
    }
}

/// Entity cache settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum cached entities.
    pub capacity: usize,
    /// Entry lifetime. `None` keeps entries until evicted.
    pub ttl_secs: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            ttl_secs: None,
        }
    }
}

/// Summarizer settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    /// Entity selection strategy.
    pub strategy: SummaryStrategy,
    /// Output format.
    pub format: SummaryFormat,
    /// Below this many entities nothing is summarized.
    pub min_entities_to_summarize: usize,
    /// Upper bound on entities per summary; also a trigger threshold.
    pub max_entities_per_summary: usize,
    /// Time span that triggers summarization, in days.
    pub summary_interval_days: u32,
    /// Most recent days excluded by time-based selection.
    pub preserve_recent_days: u32,
    /// Minimum importance for importance-based selection.
    pub importance_threshold: f64,
    /// Gap that splits relevance clusters, in hours.
    pub cluster_window_hours: u32,
    /// Summary cache entry lifetime.
    pub cache_ttl_secs: u64,
    /// Maximum cached summaries.
    pub cache_capacity: usize,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            strategy: SummaryStrategy::Hybrid,
            format: SummaryFormat::Text,
            min_entities_to_summarize: 10,
            max_entities_per_summary: 50,
            summary_interval_days: 7,
            preserve_recent_days: 3,
            importance_threshold: 0.6,
            cluster_window_hours: 24,
            cache_ttl_secs: 3600,
            cache_capacity: 100,
        }
    }
}

/// Consistency checker settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsistencyConfig {
    /// Same-type entities created closer than this are flagged.
    ///
    /// A heuristic. Normally paced sessions will trip it; widen or shrink it
    /// to taste.
    pub temporal_window_hours: f64,
    /// Run duplicate detection.
    pub check_duplicates: bool,
    /// Run temporal conflict detection.
    pub check_temporal: bool,
    /// Run logical contradiction rules.
    pub check_logical: bool,
    /// Run relation referential checks.
    pub check_relationships: bool,
    /// Run fact contradiction detection.
    pub check_facts: bool,
    /// Resolved issues older than this are purged by maintenance.
    pub purge_after_days: u32,
}

impl Default for ConsistencyConfig {
    fn default() -> Self {
        Self {
            temporal_window_hours: 24.0,
            check_duplicates: true,
            check_temporal: true,
            check_logical: true,
            check_relationships: true,
            check_facts: true,
            purge_after_days: 30,
        }
    }
}

/// Relation graph traversal settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Hard cap on relationship network depth.
    pub max_relationships_depth: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_relationships_depth: 3,
        }
    }
}

/// Available LLM providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LlmProviderKind {
    /// No LLM; summaries use the template generator.
    #[default]
    None,
    /// Anthropic Claude.
    Anthropic,
    /// `OpenAI` chat completions.
    OpenAi,
    /// Ollama (local).
    Ollama,
}

impl LlmProviderKind {
    /// Parses a provider string. Unknown names disable the LLM.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "anthropic" | "claude" => Self::Anthropic,
            "openai" => Self::OpenAi,
            "ollama" => Self::Ollama,
            _ => Self::None,
        }
    }
}

/// LLM provider configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Provider.
    pub provider: LlmProviderKind,
    /// Model name. Each provider has its own default.
    pub model: Option<String>,
    /// API key. Falls back to the provider's usual environment variable.
    pub api_key: Option<SecretString>,
    /// Base URL (self-hosted or proxy).
    pub base_url: Option<String>,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Completion length cap.
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProviderKind::None,
            model: None,
            api_key: None,
            base_url: None,
            timeout_ms: 30_000,
            connect_timeout_ms: 3_000,
            max_tokens: 1024,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging and metrics settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `WORLD_MEMORY_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
    /// Append logs to this file instead of stderr.
    pub file: Option<PathBuf>,
    /// Serve Prometheus metrics on this address (e.g. `127.0.0.1:9464`).
    pub metrics_listen: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
            metrics_listen: None,
        }
    }
}
