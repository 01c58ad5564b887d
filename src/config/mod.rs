//! Configuration management.
//!
//! Configuration is resolved in three layers, later layers winning:
//!
//! 1. Built-in defaults
//! 2. A TOML file (`--config`, or `world-memory/config.toml` in the platform
//!    config directory)
//! 3. `WORLD_MEMORY_*` environment variables
//!
//! ```toml
//! [storage]
//! path = "/var/lib/world-memory/world.db"
//!
//! [vector]
//! backend = "redis"
//! url = "redis://localhost:6379"
//!
//! [summary]
//! strategy = "time_based"
//! preserve_recent_days = 3
//!
//! [llm]
//! provider = "anthropic"
//! ```

mod features;
mod sections;

pub use features::FeatureFlags;
pub use sections::{
    CacheConfig, ConsistencyConfig, EmbeddingConfig, EmbeddingProviderKind, GraphConfig,
    LlmConfig, LlmProviderKind, LogFormat, LoggingConfig, StorageConfig, SummaryConfig,
    VectorBackendKind, VectorConfig,
};

use crate::models::{SummaryFormat, SummaryStrategy};
use crate::{Error, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "WORLD_MEMORY_";

/// Complete engine configuration.
#[derive(Debug, Clone, Default)]
pub struct MemoryConfig {
    /// Component switches.
    pub features: FeatureFlags,
    /// Structured store.
    pub storage: StorageConfig,
    /// Vector index.
    pub vector: VectorConfig,
    /// Embedding provider.
    pub embedding: EmbeddingConfig,
    /// Entity cache.
    pub cache: CacheConfig,
    /// Summarizer.
    pub summary: SummaryConfig,
    /// Consistency checker.
    pub consistency: ConsistencyConfig,
    /// Relationship graph traversal.
    pub graph: GraphConfig,
    /// Text generation backend.
    pub llm: LlmConfig,
    /// Logging and metrics.
    pub logging: LoggingConfig,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Feature flags.
    pub features: Option<FeatureFlags>,
    /// Storage section.
    pub storage: Option<StorageConfig>,
    /// Vector section.
    pub vector: Option<VectorConfig>,
    /// Embedding section.
    pub embedding: Option<EmbeddingConfig>,
    /// Cache section.
    pub cache: Option<CacheConfig>,
    /// Summary section.
    pub summary: Option<SummaryConfig>,
    /// Consistency section.
    pub consistency: Option<ConsistencyConfig>,
    /// Graph section.
    pub graph: Option<GraphConfig>,
    /// LLM section.
    pub llm: Option<ConfigFileLlm>,
    /// Logging section.
    pub logging: Option<LoggingConfig>,
}

/// LLM section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileLlm {
    /// Provider name.
    pub provider: Option<String>,
    /// Model name.
    pub model: Option<String>,
    /// API key.
    pub api_key: Option<String>,
    /// Base URL.
    pub base_url: Option<String>,
    /// Request timeout.
    pub timeout_ms: Option<u64>,
    /// Connect timeout.
    pub connect_timeout_ms: Option<u64>,
    /// Completion length cap.
    pub max_tokens: Option<u32>,
}

impl MemoryConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fully in-process configuration: no database file, in-memory vectors,
    /// hash embeddings, template summaries.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            storage: StorageConfig { path: None },
            ..Self::default()
        }
    }

    /// Sets the `SQLite` database path.
    #[must_use]
    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage.path = Some(path.into());
        self
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the TOML is malformed or a value
    /// is out of range.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(contents)
            .map_err(|e| Error::InvalidInput(format!("config: {e}")))?;
        let config = Self::from_config_file(file);
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::InvalidInput(format!("read {}: {e}", path.display())))?;
        Self::from_toml(&contents)
    }

    /// Returns the default config file location, if a home directory exists.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "world-memory")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Returns the default database location, if a home directory exists.
    #[must_use]
    pub fn default_db_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "world-memory")
            .map(|dirs| dirs.data_dir().join("world.db"))
    }

    /// Loads configuration from the default location, then applies
    /// environment overrides.
    ///
    /// A missing file yields defaults with a file-backed database in the
    /// platform data directory. An unreadable or invalid file is logged and
    /// ignored.
    #[must_use]
    pub fn load_default() -> Self {
        let mut config = match Self::default_path() {
            Some(path) if path.exists() => Self::load_from_file(&path).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "ignoring config file");
                Self::default()
            }),
            _ => Self::default(),
        };
        if config.storage.path.is_none() {
            config.storage.path = Self::default_db_path();
        }
        config.with_env_overrides()
    }

    /// Converts a `ConfigFile` to `MemoryConfig`.
    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(features) = file.features {
            config.features = features;
        }
        if let Some(storage) = file.storage {
            config.storage = storage;
        }
        if let Some(vector) = file.vector {
            config.vector = vector;
        }
        if let Some(embedding) = file.embedding {
            config.embedding = embedding;
        }
        if let Some(cache) = file.cache {
            config.cache = cache;
        }
        if let Some(summary) = file.summary {
            config.summary = summary;
        }
        if let Some(consistency) = file.consistency {
            config.consistency = consistency;
        }
        if let Some(graph) = file.graph {
            config.graph = graph;
        }
        if let Some(logging) = file.logging {
            config.logging = logging;
        }
        if let Some(llm) = file.llm {
            if let Some(provider) = llm.provider {
                config.llm.provider = LlmProviderKind::parse(&provider);
            }
            config.llm.model = llm.model;
            config.llm.api_key = llm.api_key.map(SecretString::from);
            config.llm.base_url = llm.base_url;
            if let Some(v) = llm.timeout_ms {
                config.llm.timeout_ms = v;
            }
            if let Some(v) = llm.connect_timeout_ms {
                config.llm.connect_timeout_ms = v;
            }
            if let Some(v) = llm.max_tokens {
                config.llm.max_tokens = v;
            }
        }

        config
    }

    /// Applies `WORLD_MEMORY_*` environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary lookup, keyed by full variable name.
    ///
    /// Values that fail to parse are logged and skipped.
    #[must_use]
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(v) = get("DB_PATH") {
            self.storage.path = if v.is_empty() || v == ":memory:" {
                None
            } else {
                Some(PathBuf::from(v))
            };
        }
        if let Some(v) = get("VECTOR_BACKEND") {
            match VectorBackendKind::parse(&v) {
                Some(kind) => self.vector.backend = kind,
                None => tracing::warn!(value = %v, "unknown vector backend override"),
            }
        }
        if let Some(v) = get("VECTOR_URL") {
            self.vector.url = Some(v);
        }
        if let Some(v) = get("EMBEDDING_PROVIDER") {
            match EmbeddingProviderKind::parse(&v) {
                Some(kind) => self.embedding.provider = kind,
                None => tracing::warn!(value = %v, "unknown embedding provider override"),
            }
        }
        if let Some(v) = get("EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        override_parsed(&get, "CACHE_CAPACITY", &mut self.cache.capacity);
        if let Some(v) = get("CACHE_TTL_SECS") {
            self.cache.ttl_secs = v.parse().ok().filter(|secs| *secs > 0);
        }
        if let Some(v) = get("SUMMARY_STRATEGY") {
            match SummaryStrategy::parse(&v) {
                Some(strategy) => self.summary.strategy = strategy,
                None => tracing::warn!(value = %v, "unknown summary strategy override"),
            }
        }
        if let Some(v) = get("SUMMARY_FORMAT") {
            match SummaryFormat::parse(&v) {
                Some(format) => self.summary.format = format,
                None => tracing::warn!(value = %v, "unknown summary format override"),
            }
        }
        override_parsed(
            &get,
            "TEMPORAL_WINDOW_HOURS",
            &mut self.consistency.temporal_window_hours,
        );
        override_parsed(
            &get,
            "MAX_RELATIONSHIPS_DEPTH",
            &mut self.graph.max_relationships_depth,
        );
        if let Some(v) = get("LLM_PROVIDER") {
            self.llm.provider = LlmProviderKind::parse(&v);
        }
        if let Some(v) = get("LLM_MODEL") {
            self.llm.model = Some(v);
        }
        if let Some(v) = get("LLM_API_KEY") {
            self.llm.api_key = Some(SecretString::from(v));
        }
        if let Some(v) = get("LLM_BASE_URL") {
            self.llm.base_url = Some(v);
        }
        override_parsed(&get, "LLM_TIMEOUT_MS", &mut self.llm.timeout_ms);
        if let Some(v) = get("LOG_FORMAT") {
            self.logging.format = if v.eq_ignore_ascii_case("json") {
                LogFormat::Json
            } else {
                LogFormat::Pretty
            };
        }
        if let Some(v) = get("LOG_FILE") {
            self.logging.file = Some(PathBuf::from(v));
        }
        if let Some(v) = get("METRICS_LISTEN") {
            self.logging.metrics_listen = Some(v);
        }

        self
    }

    /// Checks values that would make components misbehave.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] naming the first bad value.
    pub fn validate(&self) -> Result<()> {
        let bad = |msg: &str| Err(Error::InvalidInput(msg.to_string()));
        if self.cache.capacity == 0 {
            return bad("cache.capacity must be at least 1");
        }
        if self.embedding.dimensions == 0 {
            return bad("embedding.dimensions must be at least 1");
        }
        if self.summary.min_entities_to_summarize == 0 {
            return bad("summary.min_entities_to_summarize must be at least 1");
        }
        if self.summary.max_entities_per_summary < self.summary.min_entities_to_summarize {
            return bad("summary.max_entities_per_summary must be >= min_entities_to_summarize");
        }
        if !(0.0..=1.0).contains(&self.summary.importance_threshold) {
            return bad("summary.importance_threshold must be within [0, 1]");
        }
        if !self.consistency.temporal_window_hours.is_finite()
            || self.consistency.temporal_window_hours < 0.0
        {
            return bad("consistency.temporal_window_hours must be a non-negative number");
        }
        if self.vector.backend != VectorBackendKind::Memory && self.vector.url.is_none() {
            return bad("vector.url is required for external vector backends");
        }
        Ok(())
    }
}

fn override_parsed<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    name: &str,
    target: &mut T,
) {
    if let Some(raw) = get(name) {
        match raw.parse() {
            Ok(value) => *target = value,
            Err(_) => tracing::warn!(variable = name, value = %raw, "ignoring unparsable override"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_validate() {
        let config = MemoryConfig::in_memory();
        assert!(config.validate().is_ok());
        assert!(config.storage.path.is_none());
        assert_eq!(config.cache.capacity, 1000);
        assert!((config.consistency.temporal_window_hours - 24.0).abs() < f64::EPSILON);
        assert_eq!(config.graph.max_relationships_depth, 3);
        assert_eq!(config.llm.provider, LlmProviderKind::None);
    }

    #[test]
    fn test_from_toml_partial_sections() {
        let config = MemoryConfig::from_toml(
            r#"
            [cache]
            capacity = 5
            ttl_secs = 60

            [summary]
            strategy = "time_based"
            format = "bullet_points"
            preserve_recent_days = 2

            [consistency]
            temporal_window_hours = 1.5

            [llm]
            provider = "ollama"
            model = "llama3.2"
            "#,
        )
        .unwrap();

        assert_eq!(config.cache.capacity, 5);
        assert_eq!(config.cache.ttl_secs, Some(60));
        assert_eq!(config.summary.strategy, SummaryStrategy::TimeBased);
        assert_eq!(config.summary.format, SummaryFormat::BulletPoints);
        assert_eq!(config.summary.preserve_recent_days, 2);
        assert_eq!(config.summary.max_entities_per_summary, 50);
        assert!((config.consistency.temporal_window_hours - 1.5).abs() < f64::EPSILON);
        assert!(config.consistency.check_duplicates);
        assert_eq!(config.llm.provider, LlmProviderKind::Ollama);
        assert_eq!(config.llm.model.as_deref(), Some("llama3.2"));
    }

    #[test]
    fn test_from_toml_rejects_bad_values() {
        assert!(MemoryConfig::from_toml("[cache]\ncapacity = 0").is_err());
        assert!(MemoryConfig::from_toml("[vector]\nbackend = \"redis\"").is_err());
        assert!(MemoryConfig::from_toml("[bogus]\nx = 1").is_err());
        assert!(MemoryConfig::from_toml("not toml at all [").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("WORLD_MEMORY_DB_PATH", ":memory:"),
            ("WORLD_MEMORY_CACHE_CAPACITY", "42"),
            ("WORLD_MEMORY_VECTOR_BACKEND", "pgvector"),
            ("WORLD_MEMORY_TEMPORAL_WINDOW_HOURS", "not-a-number"),
            ("WORLD_MEMORY_LLM_PROVIDER", "anthropic"),
            ("WORLD_MEMORY_LLM_API_KEY", "sk-test"),
            ("WORLD_MEMORY_LOG_FORMAT", "JSON"),
        ]
        .into_iter()
        .collect();

        let config = MemoryConfig::new()
            .with_db_path("/tmp/w.db")
            .with_overrides_from(|k| vars.get(k).map(|v| (*v).to_string()));

        assert!(config.storage.path.is_none());
        assert_eq!(config.cache.capacity, 42);
        assert_eq!(config.vector.backend, VectorBackendKind::Pgvector);
        assert!((config.consistency.temporal_window_hours - 24.0).abs() < f64::EPSILON);
        assert_eq!(config.llm.provider, LlmProviderKind::Anthropic);
        assert_eq!(
            config.llm.api_key.as_ref().map(|k| k.expose_secret()),
            Some("sk-test")
        );
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[graph]\nmax_relationships_depth = 5\n").unwrap();
        let config = MemoryConfig::load_from_file(&path).unwrap();
        assert_eq!(config.graph.max_relationships_depth, 5);
        assert!(MemoryConfig::load_from_file(&dir.path().join("missing.toml")).is_err());
    }
}
