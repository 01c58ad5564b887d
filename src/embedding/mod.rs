//! Embedding generation.
//!
//! - [`HashEmbedder`]: deterministic, offline, token-hash embeddings (default)
//! - [`FastEmbedEmbedder`]: ONNX sentence embeddings, `fastembed-embeddings` feature
//! - [`CachedEmbedder`]: LRU in front of either, keyed by SHA-256 of the text

// Allow cast precision loss for hash-based embedding calculations.
#![allow(clippy::cast_precision_loss)]
// Allow cast possible truncation for hash index calculations on 32-bit platforms.
#![allow(clippy::cast_possible_truncation)]

mod cached;
mod fastembed;
mod hash;

pub use cached::CachedEmbedder;
pub use fastembed::FastEmbedEmbedder;
pub use hash::HashEmbedder;

use crate::Result;

/// Embedding width of all-MiniLM-L6-v2, also used by the hash embedder.
pub const DEFAULT_DIMENSIONS: usize = 384;

/// Trait for embedding generators.
pub trait Embedder: Send + Sync {
    /// Returns the embedding dimensions.
    fn dimensions(&self) -> usize;

    /// Generates an embedding for the given text.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Retrieval`] if embedding generation fails.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generates embeddings for multiple texts.
    ///
    /// # Errors
    ///
    /// Returns an error if any embedding fails.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// Scales `embedding` to unit length in place. Zero vectors are left alone.
pub(crate) fn normalize(embedding: &mut [f32]) {
    let norm_sq: f32 = embedding.iter().map(|x| x * x).sum();
    if norm_sq <= 0.0 {
        return;
    }
    let inv_norm = norm_sq.sqrt().recip();
    for v in embedding.iter_mut() {
        *v *= inv_norm;
    }
}
