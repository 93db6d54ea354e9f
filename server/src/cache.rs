//! Translation caching.

use lru::LruCache;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::translate::LanguagePair;

/// Cache key: the pair and the exact input text.
type TranslationKey = (LanguagePair, String);

/// Bounded LRU cache for translations.
pub struct TranslationCache {
    entries: Mutex<LruCache<TranslationKey, String>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TranslationCache {
    /// Create a new cache with the specified capacity.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN.saturating_add(999));

        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Get a cached translation.
    pub fn get(&self, pair: &LanguagePair, text: &str) -> Option<String> {
        let cached = self
            .entries
            .lock()
            .ok()?
            .get(&(pair.clone(), text.to_string()))
            .cloned();
        match cached {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        cached
    }

    /// Store a translation.
    pub fn put(&self, pair: &LanguagePair, text: &str, translated: String) {
        if let Ok(mut guard) = self.entries.lock() {
            guard.put((pair.clone(), text.to_string()), translated);
        }
    }

    /// Drop every entry, e.g. after models are reloaded.
    pub fn clear(&self) {
        if let Ok(mut guard) = self.entries.lock() {
            guard.clear();
        }
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        let (entries, capacity) = self
            .entries
            .lock()
            .map(|g| (g.len(), g.cap().get()))
            .unwrap_or((0, 0));
        CacheStats {
            entries,
            capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}
