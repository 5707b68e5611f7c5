use crate::analytics::key::MetricFilters;
use crate::error::AppError;
use deadpool_sqlite::Pool;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// A metric provider computes one JSON-serializable analytics result for a
/// given filter set. Read-only and idempotent with respect to the data store;
/// pure with respect to the cache.
pub type Provider =
    Arc<dyn Fn(Pool, MetricFilters) -> BoxFuture<'static, Result<serde_json::Value, AppError>> + Send + Sync>;

/// Fixed catalog of providers, keyed by metric name. Built once at startup
/// and never mutated afterwards.
#[derive(Default)]
pub struct ProviderRegistry {
    entries: Vec<(&'static str, Provider)>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&mut self, name: &'static str, f: F)
    where
        F: Fn(Pool, MetricFilters) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, AppError>> + Send + 'static,
    {
        let provider: Provider = Arc::new(move |pool, filters| Box::pin(f(pool, filters)));
        self.entries.push((name, provider));
    }

    pub fn get(&self, name: &str) -> Option<&Provider> {
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, p)| p)
    }

    /// Registered metric names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(n, _)| *n)
    }
}
