use pulse::analytics::{refresh, AnalyticsState};
use pulse::build_router;
use pulse::config::{CacheConfig, RefreshConfig};
use pulse::storage;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

async fn seeded_state() -> Arc<AnalyticsState> {
    // Create temp db
    let tmp = tempfile::NamedTempFile::new().unwrap();
    let db_path = tmp.path().to_path_buf();
    // Keep tmp alive by leaking it (test only)
    std::mem::forget(tmp);

    let pool = storage::sqlite::create_pool_at(&db_path).unwrap();
    storage::sqlite::init_pool(&pool).await.unwrap();

    let conn = pool.get().await.unwrap();
    conn.interact(|conn| {
        conn.execute_batch(
            "
            INSERT INTO events VALUES ('e1', 'Jazz Night', 'paris');
            INSERT INTO companies VALUES ('co1', 'Acme');
            INSERT INTO clients VALUES ('cl1', 'Alice');
            INSERT INTO products VALUES ('p1', 'e1', 'Standard', 20.0);
            INSERT INTO bookings VALUES
                ('b1', 'cl1', 'co1', 'p1', '2024-01-01', NULL),
                ('b2', 'cl1', 'co1', 'p1', '2024-01-15', NULL);
            INSERT INTO payments VALUES
                ('pay1', 'b1', 20.0, 'success', 'card', '2024-01-01');
            ",
        )
    })
    .await
    .unwrap()
    .unwrap();

    Arc::new(AnalyticsState::new(pool, &CacheConfig::default()))
}

/// Spawn the server on a random port and return the address plus the shared
/// state, so tests can inspect the cache directly.
async fn spawn_server() -> (SocketAddr, Arc<AnalyticsState>) {
    let state = seeded_state().await;
    let app = build_router(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

#[tokio::test]
async fn test_miss_computes_stores_and_responds() {
    let (addr, state) = spawn_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("http://{addr}/analytics/total_reservations"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body, serde_json::json!({ "total_reservations": 2 }));

    // Result was written back under the bare-prefix key.
    let stored = state.cache.get("total_reservations").unwrap().unwrap();
    assert_eq!(
        serde_json::from_str::<serde_json::Value>(&stored).unwrap(),
        body
    );
}

#[tokio::test]
async fn test_repeat_request_within_ttl_is_served_from_cache() {
    let (addr, state) = spawn_server().await;
    let client = reqwest::Client::new();
    let url = format!("http://{addr}/analytics/total_reservations");

    let first: serde_json::Value = client.get(&url).send().await.unwrap().json().await.unwrap();

    // Change the underlying data; a cached response must not see it.
    let conn = state.pool.get().await.unwrap();
    conn.interact(|conn| {
        conn.execute(
            "INSERT INTO bookings VALUES ('b9', 'cl1', 'co1', 'p1', '2024-01-20', NULL)",
            [],
        )
    })
    .await
    .unwrap()
    .unwrap();

    let second: serde_json::Value = client.get(&url).send().await.unwrap().json().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(second, serde_json::json!({ "total_reservations": 2 }));
}

#[tokio::test]
async fn test_filtered_request_uses_parameterized_key() {
    let (addr, state) = spawn_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!(
            "http://{addr}/analytics/arpu_daily?date_start=2024-01-01&date_end=2024-01-02"
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body.as_array().unwrap().len(), 2);

    assert!(state
        .cache
        .get("arpu_daily:date_start=2024-01-01:date_end=2024-01-02")
        .unwrap()
        .is_some());
    // The unfiltered key is untouched.
    assert!(state.cache.get("arpu_daily").unwrap().is_none());
}

#[tokio::test]
async fn test_unknown_metric_returns_404() {
    let (addr, _state) = spawn_server().await;

    let resp = reqwest::get(format!("http://{addr}/analytics/no_such_metric"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("no_such_metric"));
}

#[tokio::test]
async fn test_malformed_date_returns_400() {
    let (addr, _state) = spawn_server().await;

    let resp = reqwest::get(format!(
        "http://{addr}/analytics/total_reservations?date_start=not-a-date"
    ))
    .await
    .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_refresh_cycle_warms_catalog_then_requests_hit_cache() {
    let (addr, state) = spawn_server().await;

    for name in refresh::DEFAULT_CATALOG {
        assert!(state.cache.get(name).unwrap().is_none());
    }

    refresh::refresh_cycle(&state, refresh::DEFAULT_CATALOG, Duration::from_secs(30)).await;

    for name in refresh::DEFAULT_CATALOG {
        assert!(
            state.cache.get(name).unwrap().is_some(),
            "{name} not warmed"
        );
    }

    // A request for a warmed metric is answered straight from cache.
    let body: serde_json::Value = reqwest::get(format!("http://{addr}/analytics/bookings"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_home_endpoint() {
    let (addr, _state) = spawn_server().await;

    let body: serde_json::Value = reqwest::get(format!("http://{addr}/"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, serde_json::json!({ "message": "API OK" }));
}

#[tokio::test]
async fn test_refresh_loop_runs_first_cycle_immediately() {
    let state = seeded_state().await;
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let handle = tokio::spawn(refresh::refresh_loop(
        state.clone(),
        refresh::DEFAULT_CATALOG,
        RefreshConfig::default(),
        shutdown_rx,
    ));

    // The first tick fires at startup; give it a moment to complete.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(state.cache.get("total_reservations").unwrap().is_some());

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("refresher did not stop")
        .unwrap();
}
