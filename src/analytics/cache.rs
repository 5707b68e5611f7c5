use moka::sync::Cache;
use moka::Expiry;
use std::time::{Duration, Instant};

/// Store failure. Callers on the read path treat this as a miss; writers log
/// and drop it. It never reaches the HTTP caller.
#[derive(Debug, thiserror::Error)]
#[error("cache unavailable: {0}")]
pub struct CacheUnavailable(pub String);

/// Get/set-with-TTL contract shared by the request handler and the background
/// refresher. Constructed once and injected into the state that uses it.
pub trait CacheStore: Send + Sync {
    /// Returns the stored value if present and not expired. Absence is a
    /// normal outcome, not an error.
    fn get(&self, key: &str) -> Result<Option<String>, CacheUnavailable>;

    /// Stores `value` under `key` with expiration at `now + ttl`, replacing
    /// any prior entry.
    fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheUnavailable>;
}

#[derive(Clone)]
struct Entry {
    value: String,
    ttl: Duration,
}

struct PerEntryTtl;

impl Expiry<String, Entry> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, entry: &Entry, _created_at: Instant) -> Option<Duration> {
        Some(entry.ttl)
    }

    // Overwrites restart the clock at the new entry's TTL; without this the
    // previous entry's remaining duration would carry over.
    fn expire_after_update(
        &self,
        _key: &String,
        entry: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// In-process cache of serialized JSON metric results, keyed on
/// `prefix[:name=value...]` strings, each entry carrying its own TTL.
pub struct MemoryCache {
    inner: Cache<String, Entry>,
}

impl MemoryCache {
    pub fn new(max_entries: u64) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_entries)
                .expire_after(PerEntryTtl)
                .build(),
        }
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<String>, CacheUnavailable> {
        Ok(self.inner.get(key).map(|e| e.value))
    }

    fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheUnavailable> {
        self.inner.insert(key.to_string(), Entry { value, ttl });
        Ok(())
    }
}

/// Read-path wrapper: a store failure is logged and degrades to a miss.
pub fn get_or_miss(store: &dyn CacheStore, key: &str) -> Option<String> {
    match store.get(key) {
        Ok(hit) => hit,
        Err(e) => {
            tracing::warn!(key, error = %e, "cache read failed, treating as miss");
            None
        }
    }
}

/// Write-path wrapper: a store failure is logged and swallowed. Caching is an
/// optimization, not a correctness requirement.
pub fn set_or_drop(store: &dyn CacheStore, key: &str, value: String, ttl: Duration) {
    if let Err(e) = store.set(key, value, ttl) {
        tracing::warn!(key, error = %e, "cache write failed, dropping entry");
    }
}
