//! Deterministic token-hash embedder.
//!
//! Each lowercased word is hashed with SHA-256 and scattered over a few
//! dimensions, then the vector is normalized. Texts that share words end up
//! close; texts that merely mean the same thing do not. Good enough for tests,
//! offline use, and keyword-ish recall.

use super::{DEFAULT_DIMENSIONS, Embedder, normalize};
use crate::{Error, Result};
use sha2::{Digest, Sha256};

/// Caps work on very long inputs.
const MAX_TOKENS: usize = 2000;

/// Hash-based pseudo-embedder.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    /// Creates an embedder with [`DEFAULT_DIMENSIONS`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            dimensions: DEFAULT_DIMENSIONS,
        }
    }

    /// Creates an embedder producing `dimensions`-long vectors (minimum 1).
    #[must_use]
    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn distribute(&self, embedding: &mut [f32], digest: &[u8]) {
        // Four (index, value) pairs per token, eight bytes each.
        for chunk in digest.chunks_exact(8).take(4) {
            let mut idx_bytes = [0u8; 4];
            idx_bytes.copy_from_slice(&chunk[..4]);
            let idx = u32::from_le_bytes(idx_bytes) as usize % self.dimensions;
            let value = f32::from(chunk[4]) / 255.0 - 0.5;
            let sign = if chunk[5] & 1 == 0 { 1.0 } else { -1.0 };
            embedding[idx] += sign * (0.5 + value.abs());
        }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl Embedder for HashEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(Error::InvalidInput("cannot embed empty text".to_string()));
        }

        let mut embedding = vec![0.0f32; self.dimensions];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .take(MAX_TOKENS)
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            self.distribute(&mut embedding, &digest);
        }
        normalize(&mut embedding);
        Ok(embedding)
    }
}
