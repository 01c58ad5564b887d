//! FastEmbed-based embedder.
//!
//! Real sentence embeddings through fastembed-rs (ONNX). Only available with
//! the `fastembed-embeddings` feature; without it, construction fails with
//! [`crate::Error::FeatureNotEnabled`] and callers fall back to
//! [`super::HashEmbedder`].

#[cfg(feature = "fastembed-embeddings")]
mod native {
    use super::super::Embedder;
    use crate::storage::sqlite::acquire_lock;
    use crate::{Error, Result};
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::sync::Mutex;
    use std::time::Instant;

    /// `FastEmbed` sentence embedder.
    ///
    /// The model is loaded on first use and owned by this instance.
    pub struct FastEmbedEmbedder {
        model_name: String,
        model_kind: fastembed::EmbeddingModel,
        dimensions: usize,
        model: Mutex<Option<fastembed::TextEmbedding>>,
    }

    impl FastEmbedEmbedder {
        /// Creates an embedder for a named model.
        ///
        /// Recognised names: `all-MiniLM-L6-v2`, `bge-small-en-v1.5`,
        /// `bge-base-en-v1.5`.
        ///
        /// # Errors
        ///
        /// Returns [`Error::InvalidInput`] for an unknown model name.
        pub fn new(model_name: &str) -> Result<Self> {
            let (model_kind, dimensions) = match model_name.to_ascii_lowercase().as_str() {
                "all-minilm-l6-v2" | "" => (fastembed::EmbeddingModel::AllMiniLML6V2, 384),
                "bge-small-en-v1.5" => (fastembed::EmbeddingModel::BGESmallENV15, 384),
                "bge-base-en-v1.5" => (fastembed::EmbeddingModel::BGEBaseENV15, 768),
                other => {
                    return Err(Error::InvalidInput(format!(
                        "unknown embedding model: {other}"
                    )));
                },
            };
            Ok(Self {
                model_name: model_name.to_string(),
                model_kind,
                dimensions,
                model: Mutex::new(None),
            })
        }

        /// Returns the model name.
        #[must_use]
        pub fn model_name(&self) -> &str {
            &self.model_name
        }

        fn run(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
            let mut slot = acquire_lock(&self.model);
            if slot.is_none() {
                tracing::info!(model = %self.model_name, "loading embedding model");
                let start = Instant::now();
                let options = fastembed::InitOptions::new(self.model_kind.clone())
                    .with_show_download_progress(false);
                let loaded = fastembed::TextEmbedding::try_new(options)
                    .map_err(|e| Error::retrieval("load_embedding_model", e))?;
                tracing::info!(
                    model = %self.model_name,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "embedding model loaded"
                );
                *slot = Some(loaded);
            }
            let Some(model) = slot.as_mut() else {
                return Err(Error::retrieval("embed", "embedding model unavailable"));
            };

            // ONNX runtime can panic on malformed input.
            catch_unwind(AssertUnwindSafe(|| model.embed(texts, None)))
                .map_err(|_| Error::retrieval("embed", "ONNX runtime panicked"))?
                .map_err(|e| Error::retrieval("embed", e))
        }
    }

    impl Embedder for FastEmbedEmbedder {
        fn dimensions(&self) -> usize {
            self.dimensions
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if text.trim().is_empty() {
                return Err(Error::InvalidInput("cannot embed empty text".to_string()));
            }
            self.run(vec![text.to_string()])?
                .into_iter()
                .next()
                .ok_or_else(|| Error::retrieval("embed", "no embedding returned"))
        }

        fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            if texts.is_empty() {
                return Ok(Vec::new());
            }
            if texts.iter().any(|t| t.trim().is_empty()) {
                return Err(Error::InvalidInput("cannot embed empty text".to_string()));
            }
            self.run(texts.iter().map(|s| (*s).to_string()).collect())
        }
    }
}

#[cfg(feature = "fastembed-embeddings")]
pub use native::FastEmbedEmbedder;

#[cfg(not(feature = "fastembed-embeddings"))]
mod disabled {
    use super::super::Embedder;
    use crate::{Error, Result};

    /// `FastEmbed` sentence embedder (not compiled in).
    pub struct FastEmbedEmbedder {
        dimensions: usize,
    }

    impl FastEmbedEmbedder {
        /// Creates an embedder for a named model.
        ///
        /// # Errors
        ///
        /// Always returns [`Error::FeatureNotEnabled`].
        pub fn new(_model_name: &str) -> Result<Self> {
            Err(Error::FeatureNotEnabled("fastembed-embeddings".to_string()))
        }
    }

    impl Embedder for FastEmbedEmbedder {
        fn dimensions(&self) -> usize {
            self.dimensions
        }

        fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(Error::FeatureNotEnabled("fastembed-embeddings".to_string()))
        }
    }
}

#[cfg(not(feature = "fastembed-embeddings"))]
pub use disabled::FastEmbedEmbedder;
