//! Content-hash embedding cache.

use super::Embedder;
use crate::Result;
use crate::cache::TtlLruCache;
use crate::storage::sqlite::acquire_lock;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Embedder decorator that memoizes results by SHA-256 of the input text.
///
/// Identical text always yields the cached vector, so re-indexing an
/// unchanged entity never calls the underlying model.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: Mutex<TtlLruCache<String, Arc<Vec<f32>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CachedEmbedder {
    /// Wraps `inner` with a cache of at most `capacity` vectors.
    #[must_use]
    pub fn new(inner: Arc<dyn Embedder>, capacity: usize) -> Self {
        Self {
            inner,
            cache: Mutex::new(TtlLruCache::new(capacity, None)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns `(hits, misses)` since construction.
    #[must_use]
    pub fn counters(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    /// Number of cached vectors.
    #[must_use]
    pub fn len(&self) -> usize {
        acquire_lock(&self.cache).len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn content_key(text: &str) -> String {
        hex::encode(Sha256::digest(text.as_bytes()))
    }
}

impl Embedder for CachedEmbedder {
    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let key = Self::content_key(text);
        if let Some(hit) = acquire_lock(&self.cache).get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("cache_hits_total", "cache" => "embedding").increment(1);
            return Ok(hit.as_ref().clone());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("cache_misses_total", "cache" => "embedding").increment(1);

        // Computed outside the lock; two racing misses both embed and the
        // second put wins, which is harmless for identical input.
        let embedding = self.inner.embed(text)?;
        acquire_lock(&self.cache).put(key, Arc::new(embedding.clone()));
        Ok(embedding)
    }
}
