//! In-memory LRU name cache with positive and negative TTLs.

use std::num::NonZeroUsize;

use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::ResolveKey;

/// A cached resolution outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Resolved display name, `None` for a negative result.
    pub name: Option<String>,
    /// Creation time in unix milliseconds.
    pub timestamp: i64,
}

/// Expiry windows in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ttls {
    pub positive_ms: i64,
    pub negative_ms: i64,
}

/// Classification of a cache entry at a given instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Live positive entry.
    Hit(String),
    /// Live negative entry: do not fetch again yet.
    Negative,
    /// Absent or expired.
    Miss,
}

impl CacheEntry {
    pub fn positive(name: impl Into<String>, timestamp: i64) -> Self {
        Self {
            name: Some(name.into()),
            timestamp,
        }
    }

    pub fn negative(timestamp: i64) -> Self {
        Self {
            name: None,
            timestamp,
        }
    }

    pub fn is_live(&self, now: i64, ttls: Ttls) -> bool {
        let ttl = if self.name.is_some() {
            ttls.positive_ms
        } else {
            ttls.negative_ms
        };
        now.saturating_sub(self.timestamp) < ttl
    }

    pub fn lookup(&self, now: i64, ttls: Ttls) -> Lookup {
        if !self.is_live(now, ttls) {
            return Lookup::Miss;
        }
        match &self.name {
            Some(name) => Lookup::Hit(name.clone()),
            None => Lookup::Negative,
        }
    }
}

/// Key → entry map bounded by capacity, least-recently-used evicted first.
///
/// Expired entries are not removed eagerly; they are skipped by
/// [`CacheEntry::lookup`] and fall out through capacity eviction or
/// overwrite.
pub struct ResolutionCache {
    entries: LruCache<ResolveKey, CacheEntry>,
}

impl ResolutionCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
        }
    }

    /// Look up an entry and mark it most recently used.
    pub fn get(&mut self, key: &ResolveKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Look up an entry without touching recency.
    pub fn peek(&self, key: &ResolveKey) -> Option<&CacheEntry> {
        self.entries.peek(key)
    }

    /// Insert or overwrite an entry.
    ///
    /// Returns the key evicted to make room, if any.
    pub fn set(&mut self, key: ResolveKey, name: Option<String>, now: i64) -> Option<ResolveKey> {
        self.insert(key, CacheEntry { name, timestamp: now })
    }

    pub fn insert(&mut self, key: ResolveKey, entry: CacheEntry) -> Option<ResolveKey> {
        match self.entries.push(key.clone(), entry) {
            Some((evicted, _)) if evicted != key => Some(evicted),
            _ => None,
        }
    }

    pub fn remove(&mut self, key: &ResolveKey) -> Option<CacheEntry> {
        self.entries.pop(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    /// Entries from least to most recently used.
    pub fn iter_lru(&self) -> impl Iterator<Item = (&ResolveKey, &CacheEntry)> {
        self.entries.iter().rev()
    }
}
