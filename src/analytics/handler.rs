use crate::analytics::cache::{get_or_miss, set_or_drop};
use crate::analytics::key::{build_key, MetricFilters, MetricQuery};
use crate::analytics::provider::Provider;
use crate::analytics::AnalyticsState;
use crate::error::{AppError, AppResult};
use axum::extract::{Path, Query, State};
use axum::Json;
use std::sync::Arc;

/// GET /analytics/{metric}
///
/// One generic handler serves the whole metric catalog: build the cache key,
/// return the cached value on a hit, otherwise compute through the provider
/// and write the result back with the default TTL.
pub async fn get_metric(
    State(state): State<Arc<AnalyticsState>>,
    Path(metric): Path<String>,
    Query(query): Query<MetricQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let provider = state
        .registry
        .get(&metric)
        .ok_or_else(|| AppError::NotFound(format!("unknown metric: {metric}")))?
        .clone();

    let value = cached_or_compute(&state, &metric, &provider, query.into_filters()).await?;
    Ok(Json(value))
}

/// Cache-aside core. A hit is returned verbatim, at most stale by the entry's
/// TTL. On a miss the provider runs synchronously and its result is written
/// back before responding; provider failures propagate and are never cached.
///
/// Two concurrent misses for the same key both compute and both write (last
/// write wins). Providers are read-only and idempotent, so this is only a
/// duplicated-work inefficiency.
pub async fn cached_or_compute(
    state: &AnalyticsState,
    metric: &str,
    provider: &Provider,
    filters: MetricFilters,
) -> AppResult<serde_json::Value> {
    let key = build_key(metric, &filters.key_parts());

    if let Some(raw) = get_or_miss(&*state.cache, &key) {
        match serde_json::from_str(&raw) {
            Ok(value) => {
                tracing::debug!(key, "cache hit");
                return Ok(value);
            }
            Err(e) => {
                // Corrupt entry: fall through and recompute over it.
                tracing::warn!(key, error = %e, "cached value failed to deserialize");
            }
        }
    }

    tracing::debug!(key, "cache miss, computing");
    let value = provider.as_ref()(state.pool.clone(), filters).await?;
    let raw = serde_json::to_string(&value)
        .map_err(|e| AppError::Internal(format!("serialize metric result: {e}")))?;
    set_or_drop(&*state.cache, &key, raw, state.default_ttl());

    Ok(value)
}

/// GET /
pub async fn home() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": "API OK" }))
}
