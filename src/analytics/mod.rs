pub mod cache;
pub mod handler;
pub mod key;
pub mod provider;
pub mod providers;
pub mod queries;
pub mod refresh;

use crate::config::CacheConfig;
use cache::{CacheStore, MemoryCache};
use deadpool_sqlite::Pool;
use provider::ProviderRegistry;
use std::sync::Arc;
use std::time::Duration;

/// Shared state for the metric endpoints and the background refresher.
pub struct AnalyticsState {
    pub pool: Pool,
    pub cache: Arc<dyn CacheStore>,
    pub registry: ProviderRegistry,
    default_ttl: Duration,
}

impl AnalyticsState {
    pub fn new(pool: Pool, config: &CacheConfig) -> Self {
        Self::with_cache(pool, Arc::new(MemoryCache::new(config.max_entries)), config)
    }

    pub fn with_cache(pool: Pool, cache: Arc<dyn CacheStore>, config: &CacheConfig) -> Self {
        let mut registry = ProviderRegistry::new();
        providers::register_builtin(&mut registry);
        Self {
            pool,
            cache,
            registry,
            default_ttl: Duration::from_secs(config.ttl_secs),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }
}
