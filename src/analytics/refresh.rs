use crate::analytics::cache::set_or_drop;
use crate::analytics::key::MetricFilters;
use crate::analytics::AnalyticsState;
use crate::config::RefreshConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Metrics kept warm without filters, refreshed in this order every cycle so
/// the unfiltered dashboard view is always servable from cache.
pub const DEFAULT_CATALOG: &[&str] = &[
    "total_reservations",
    "arpu_daily",
    "net_revenue_by_event",
    "top_products",
    "cohort_retention",
    "filters_metadata",
    "bookings",
];

/// Recurring refresh task. The first cycle runs at startup, then one cycle per
/// configured interval. Stops between cycles when the shutdown signal fires;
/// an in-progress cycle's remaining writes are abandoned.
pub async fn refresh_loop(
    state: Arc<AnalyticsState>,
    catalog: &'static [&'static str],
    config: RefreshConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    // A zero period would panic tokio's interval; clamp to one second.
    let period = Duration::from_secs(config.interval_mins * 60).max(Duration::from_secs(1));
    let provider_timeout = Duration::from_secs(config.provider_timeout_secs);
    let mut interval = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                refresh_cycle(&state, catalog, provider_timeout).await;
            }
            _ = shutdown.changed() => {
                tracing::info!("cache refresher stopping");
                return;
            }
        }
    }
}

/// One write-through pass over the catalog: invoke each provider with no
/// filters and force-write its result under the bare-prefix key, resetting the
/// TTL regardless of the prior entry's state. Never reads the cache.
///
/// A single failing or slow entry is logged and skipped; the rest of the cycle
/// still runs.
pub async fn refresh_cycle(state: &AnalyticsState, catalog: &[&str], provider_timeout: Duration) {
    tracing::info!(entries = catalog.len(), "refreshing metric cache");
    let mut refreshed = 0usize;

    for &name in catalog {
        let Some(provider) = state.registry.get(name) else {
            tracing::warn!(metric = name, "catalog entry has no registered provider");
            continue;
        };

        let fut = provider.as_ref()(state.pool.clone(), MetricFilters::default());
        let value = match tokio::time::timeout(provider_timeout, fut).await {
            Err(_) => {
                tracing::warn!(metric = name, timeout_secs = provider_timeout.as_secs(), "refresh timed out");
                continue;
            }
            Ok(Err(e)) => {
                tracing::warn!(metric = name, error = %e, "refresh failed");
                continue;
            }
            Ok(Ok(value)) => value,
        };

        match serde_json::to_string(&value) {
            Ok(raw) => {
                set_or_drop(&*state.cache, name, raw, state.default_ttl());
                refreshed += 1;
            }
            Err(e) => tracing::warn!(metric = name, error = %e, "refresh result failed to serialize"),
        }
    }

    tracing::info!(refreshed, total = catalog.len(), "metric cache refresh complete");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::cache::MemoryCache;
    use crate::config::CacheConfig;
    use crate::error::AppError;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_state() -> AnalyticsState {
        let pool = deadpool_sqlite::Config::new(":memory:")
            .create_pool(deadpool_sqlite::Runtime::Tokio1)
            .unwrap();
        AnalyticsState::with_cache(pool, Arc::new(MemoryCache::new(32)), &CacheConfig::default())
    }

    #[tokio::test]
    async fn test_cycle_populates_unset_keys() {
        let mut state = test_state();
        state.registry.register("total_reservations_warm", |_p, _f| async {
            Ok(json!({"total_reservations": 42}))
        });
        state.registry.register("bookings_warm", |_p, _f| async { Ok(json!([])) });

        refresh_cycle(
            &state,
            &["total_reservations_warm", "bookings_warm"],
            Duration::from_secs(5),
        )
        .await;

        assert!(state.cache.get("total_reservations_warm").unwrap().is_some());
        assert!(state.cache.get("bookings_warm").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cycle_overwrites_existing_entries() {
        let mut state = test_state();
        state.registry.register("warm", |_p, _f| async { Ok(json!({"n": 2})) });
        state
            .cache
            .set("warm", "{\"n\":1}".into(), Duration::from_secs(600))
            .unwrap();

        refresh_cycle(&state, &["warm"], Duration::from_secs(5)).await;

        assert_eq!(state.cache.get("warm").unwrap(), Some("{\"n\":2}".to_string()));
    }

    #[tokio::test]
    async fn test_one_failing_entry_does_not_abort_cycle() {
        let mut state = test_state();
        let invoked = Arc::new(AtomicUsize::new(0));

        state.registry.register("ok_1", |_p, _f| async { Ok(json!(1)) });
        state.registry.register("broken", |_p, _f| async {
            Err(AppError::Metric("malformed query".into()))
        });
        for name in ["ok_2", "ok_3", "ok_4"] {
            let invoked = invoked.clone();
            state.registry.register(name, move |_p, _f| {
                let invoked = invoked.clone();
                async move {
                    invoked.fetch_add(1, Ordering::SeqCst);
                    Ok(json!("fresh"))
                }
            });
        }

        refresh_cycle(
            &state,
            &["ok_1", "broken", "ok_2", "ok_3", "ok_4"],
            Duration::from_secs(5),
        )
        .await;

        // Every provider after the broken one still ran and still wrote.
        assert_eq!(invoked.load(Ordering::SeqCst), 3);
        assert!(state.cache.get("ok_1").unwrap().is_some());
        assert!(state.cache.get("broken").unwrap().is_none());
        for name in ["ok_2", "ok_3", "ok_4"] {
            assert!(state.cache.get(name).unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn test_hung_provider_is_timed_out_and_skipped() {
        let mut state = test_state();
        state.registry.register("stuck", |_p, _f| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(json!(null))
        });
        state.registry.register("after", |_p, _f| async { Ok(json!("done")) });

        refresh_cycle(&state, &["stuck", "after"], Duration::from_millis(50)).await;

        assert!(state.cache.get("stuck").unwrap().is_none());
        assert!(state.cache.get("after").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unknown_catalog_entry_is_skipped() {
        let mut state = test_state();
        state.registry.register("known", |_p, _f| async { Ok(json!(true)) });

        refresh_cycle(&state, &["ghost", "known"], Duration::from_secs(5)).await;

        assert!(state.cache.get("known").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_zero_interval_does_not_kill_the_loop() {
        let mut state = test_state();
        state.registry.register("warm", |_p, _f| async { Ok(json!(1)) });
        let state = Arc::new(state);
        let (tx, rx) = watch::channel(false);
        let config = crate::config::RefreshConfig {
            interval_mins: 0,
            ..Default::default()
        };

        let handle = tokio::spawn(refresh_loop(state.clone(), &["warm"], config, rx));

        // The first cycle still runs and the task is still alive to be stopped.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(state.cache.get("warm").unwrap().is_some());
        assert!(!handle.is_finished());

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("refresher did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_loop_stops_on_shutdown_signal() {
        let state = Arc::new(test_state());
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(refresh_loop(
            state,
            &[],
            crate::config::RefreshConfig::default(),
            rx,
        ));

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("refresher did not stop")
            .unwrap();
    }
}
