//! Backend factory for engine initialization.
//!
//! Centralizes backend creation so the facade, the CLI and tests build the
//! same stack from one [`MemoryConfig`].
//!
//! # Architecture
//!
//! ```text
//! BackendFactory
//!   ├── create_store()          → Arc<dyn EntityStore>   (SQLite or in-memory)
//!   ├── create_embedder()       → Arc<dyn Embedder>      (cached hash or fastembed)
//!   ├── create_vector_backend() → Option<Arc<dyn VectorBackend>>
//!   └── create_llm()            → Option<Arc<dyn LlmProvider>>
//! ```
//!
//! # Graceful Degradation
//!
//! Only the structured store is mandatory. A vector backend or LLM that fails
//! to initialize is logged and left out; the facade then falls back to
//! keyword search and template summaries.

use super::VectorIndex;
use crate::config::{EmbeddingProviderKind, MemoryConfig, VectorBackendKind};
use crate::embedding::{CachedEmbedder, Embedder, FastEmbedEmbedder, HashEmbedder};
use crate::llm::{LlmProvider, provider_from_config};
use crate::storage::{
    EntityStore, InMemoryEntityStore, InMemoryVectorBackend, PgvectorBackend,
    RedisVectorBackend, ResilientVectorBackend, SqliteEntityStore, VectorBackend,
};
use crate::{Error, Result};
use std::sync::Arc;

/// Backends built from one configuration.
pub struct BackendSet {
    /// Durable structured store (uncached).
    pub store: Arc<dyn EntityStore>,
    /// Semantic index, if enabled and reachable.
    pub vector: Option<VectorIndex>,
    /// Text-generation provider, if configured.
    pub llm: Option<Arc<dyn LlmProvider>>,
}

impl BackendSet {
    /// Returns true if semantic search is available.
    #[must_use]
    pub const fn has_vector(&self) -> bool {
        self.vector.is_some()
    }

    /// Returns true if summaries can use an LLM.
    #[must_use]
    pub fn has_llm(&self) -> bool {
        self.llm.is_some()
    }
}

/// Factory for creating storage, index and generation backends.
pub struct BackendFactory;

impl BackendFactory {
    /// Creates every backend `config` enables.
    ///
    /// # Errors
    ///
    /// Returns an error only if the structured store cannot be opened.
    pub fn create_all(config: &MemoryConfig) -> Result<BackendSet> {
        let store = Self::create_store(config)?;
        let vector = if config.features.vector {
            Self::create_vector_index(config)
        } else {
            None
        };
        let llm = if config.features.summarizer {
            Self::create_llm(config)
        } else {
            None
        };
        Ok(BackendSet { store, vector, llm })
    }

    /// Creates the structured store.
    ///
    /// With the `structured` feature off, entities live in process memory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the database cannot be opened.
    pub fn create_store(config: &MemoryConfig) -> Result<Arc<dyn EntityStore>> {
        if !config.features.structured {
            tracing::debug!("Structured store disabled, using in-memory entities");
            return Ok(Arc::new(InMemoryEntityStore::new()));
        }
        let store = match &config.storage.path {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| Error::storage("create_data_dir", e))?;
                }
                SqliteEntityStore::new(path.clone())?
            },
            None => SqliteEntityStore::in_memory()?,
        };
        tracing::debug!(path = ?config.storage.path, "Created SQLite entity store");
        Ok(Arc::new(store))
    }

    /// Creates the embedder, wrapped in a content-hash cache.
    ///
    /// A `fastembed` provider that cannot be built falls back to hash
    /// embeddings with the configured width.
    #[must_use]
    pub fn create_embedder(config: &MemoryConfig) -> Arc<dyn Embedder> {
        let inner: Arc<dyn Embedder> = match config.embedding.provider {
            EmbeddingProviderKind::Hash => {
                Arc::new(HashEmbedder::with_dimensions(config.embedding.dimensions))
            },
            EmbeddingProviderKind::Fastembed => {
                match FastEmbedEmbedder::new(&config.embedding.model) {
                    Ok(embedder) => Arc::new(embedder),
                    Err(e) => {
                        tracing::warn!(
                            model = %config.embedding.model,
                            error = %e,
                            "Failed to create fastembed embedder, using hash embeddings"
                        );
                        Arc::new(HashEmbedder::with_dimensions(config.embedding.dimensions))
                    },
                }
            },
        };
        if config.embedding.cache_capacity == 0 {
            return inner;
        }
        Arc::new(CachedEmbedder::new(inner, config.embedding.cache_capacity))
    }

    /// Creates the vector backend for `dimensions`-wide embeddings.
    ///
    /// External backends are wrapped in a circuit breaker.
    ///
    /// # Returns
    ///
    /// `Some(backend)` on success, `None` if initialization fails.
    #[must_use]
    pub fn create_vector_backend(
        config: &MemoryConfig,
        dimensions: usize,
    ) -> Option<Arc<dyn VectorBackend>> {
        let vector = &config.vector;
        let external: Result<Box<dyn VectorBackend>> = match vector.backend {
            VectorBackendKind::Memory => {
                return Some(Arc::new(InMemoryVectorBackend::new(dimensions)));
            },
            VectorBackendKind::Redis => vector
                .url
                .as_deref()
                .ok_or_else(|| Error::InvalidInput("redis backend needs vector.url".to_string()))
                .and_then(|url| RedisVectorBackend::new(url, &vector.index_name, dimensions))
                .map(|b| Box::new(b) as Box<dyn VectorBackend>),
            VectorBackendKind::Pgvector => vector
                .url
                .as_deref()
                .ok_or_else(|| {
                    Error::InvalidInput("pgvector backend needs vector.url".to_string())
                })
                .and_then(|url| {
                    PgvectorBackend::new(url, &vector.index_name, dimensions, vector.pool_size)
                })
                .map(|b| Box::new(b) as Box<dyn VectorBackend>),
        };

        match external {
            Ok(backend) => {
                tracing::debug!(backend = backend.name(), "Created vector backend");
                Some(Arc::new(ResilientVectorBackend::new(
                    backend,
                    vector.resilience.clone(),
                )))
            },
            Err(e) => {
                tracing::warn!(
                    backend = ?vector.backend,
                    error = %e,
                    "Failed to create vector backend, semantic search will degrade to keywords"
                );
                None
            },
        }
    }

    /// Creates the embedder and backend and joins them.
    #[must_use]
    pub fn create_vector_index(config: &MemoryConfig) -> Option<VectorIndex> {
        let embedder = Self::create_embedder(config);
        let backend = Self::create_vector_backend(config, embedder.dimensions())?;
        match VectorIndex::new(backend, embedder) {
            Ok(index) => Some(index),
            Err(e) => {
                tracing::warn!(error = %e, "Vector index misconfigured");
                None
            },
        }
    }

    /// Creates the LLM provider, if one is configured and usable.
    #[must_use]
    pub fn create_llm(config: &MemoryConfig) -> Option<Arc<dyn LlmProvider>> {
        match provider_from_config(&config.llm) {
            Ok(provider) => provider,
            Err(e) => {
                tracing::warn!(error = %e, "LLM unavailable, summaries will use templates");
                None
            },
        }
    }
}
