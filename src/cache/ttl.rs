//! LRU cache with optional per-entry time-to-live.

use lru::LruCache;
use std::borrow::Borrow;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Slot<V> {
    value: V,
    inserted_at: Instant,
}

/// Bounded LRU cache whose entries expire after `ttl`.
///
/// Not synchronized; owners wrap it in a `Mutex` or `RwLock`. Expired entries
/// are dropped lazily on access.
///
/// Reading with [`TtlLruCache::get`] promotes the entry; reading with
/// [`TtlLruCache::peek`] does not, which turns eviction into oldest-insert-first.
#[derive(Debug)]
pub struct TtlLruCache<K: Hash + Eq, V> {
    entries: LruCache<K, Slot<V>>,
    ttl: Option<Duration>,
    evictions: u64,
}

impl<K: Hash + Eq + Clone, V> TtlLruCache<K, V> {
    /// Creates a cache holding at most `capacity` entries (minimum 1).
    ///
    /// A `ttl` of `None` means entries never expire.
    #[must_use]
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(cap),
            ttl,
            evictions: 0,
        }
    }

    fn is_expired(&self, inserted_at: Instant) -> bool {
        self.ttl.is_some_and(|ttl| inserted_at.elapsed() > ttl)
    }

    /// Returns the value and marks it most recently used.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let expired = self
            .entries
            .peek(key)
            .is_some_and(|slot| self.is_expired(slot.inserted_at));
        if expired {
            self.entries.pop(key);
            return None;
        }
        self.entries.get(key).map(|slot| &slot.value)
    }

    /// Returns the value without touching recency.
    pub fn peek<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries
            .peek(key)
            .filter(|slot| !self.is_expired(slot.inserted_at))
            .map(|slot| &slot.value)
    }

    /// Inserts or replaces a value, returning the key evicted to make room.
    pub fn put(&mut self, key: K, value: V) -> Option<K> {
        let slot = Slot {
            value,
            inserted_at: Instant::now(),
        };
        match self.entries.push(key.clone(), slot) {
            Some((old_key, _)) if old_key != key => {
                self.evictions += 1;
                Some(old_key)
            },
            _ => None,
        }
    }

    /// Removes an entry.
    pub fn pop<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.pop(key).map(|slot| slot.value)
    }

    /// Drops every expired entry, returning how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        let Some(ttl) = self.ttl else {
            return 0;
        };
        let expired: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, slot)| slot.inserted_at.elapsed() > ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.entries.pop(key);
        }
        expired.len()
    }

    /// Number of entries, including expired ones not yet purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of entries.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    /// Entries evicted for capacity since construction.
    #[must_use]
    pub const fn evictions(&self) -> u64 {
        self.evictions
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
