use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::Serialize;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::keys::CacheKey;

struct CacheEntry<V> {
    value: V,
    tags: Vec<String>,
    inserted_at: DateTime<Utc>,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    /// Fetches currently in flight through `get_or_fetch`.
    pub pending_requests: usize,
    pub invalidations: u64,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
}

/// TTL-bounded LRU cache of query results.
///
/// No single-flight: concurrent misses on the same key may each run the
/// factory, and the last completed write wins. Entries are only written once
/// a fetch has resolved successfully.
pub struct ResultCache<V> {
    entries: Mutex<LruCache<String, CacheEntry<V>>>,
    ttl: Duration,
    max_size: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
    pending: AtomicUsize,
}

impl<V: Clone> ResultCache<V> {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
            max_size: capacity.get(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
            pending: AtomicUsize::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached value if present and unexpired, otherwise the factory's result.
    /// Factory errors are returned and never cached.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: &CacheKey, factory: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let _pending = PendingGuard::enter(&self.pending);
        let value = factory().await?;
        self.insert(key, value.clone());
        Ok(value)
    }

    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let storage_key = key.to_storage_key();
        let now = Instant::now();
        let mut entries = self.lock();

        let expired = match entries.get(&storage_key) {
            Some(entry) if !entry.is_expired(now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.pop(&storage_key);
            debug!(key = %key, "cache entry expired");
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn insert(&self, key: &CacheKey, value: V) {
        let entry = CacheEntry {
            value,
            tags: key.tags.clone(),
            inserted_at: Utc::now(),
            expires_at: Instant::now() + self.ttl,
        };
        self.lock().put(key.to_storage_key(), entry);
    }

    /// Removes every entry tagged with `entity`. Returns how many were removed.
    pub fn invalidate_entity(&self, entity: &str) -> usize {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.lock();
        let doomed: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.tags.iter().any(|t| t.eq_ignore_ascii_case(entity)))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            entries.pop(key);
        }
        debug!(entity, removed = doomed.len(), "cache invalidated for entity");
        doomed.len()
    }

    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.lock();
        let oldest_entry = entries.iter().map(|(_, e)| e.inserted_at).min();
        let newest_entry = entries.iter().map(|(_, e)| e.inserted_at).max();
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;

        CacheStats {
            size: entries.len(),
            max_size: self.max_size,
            hits,
            misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            pending_requests: self.pending.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            oldest_entry,
            newest_entry,
        }
    }

    pub fn reset_stats(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.invalidations.store(0, Ordering::Relaxed);
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, CacheEntry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keeps `pending_requests` accurate even when the caller drops the future.
struct PendingGuard<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> PendingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self { counter }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}
