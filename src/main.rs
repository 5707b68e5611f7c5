use clap::Parser;
use pulse::analytics::{refresh, AnalyticsState};
use pulse::config::AppConfig;
use pulse::{build_router, storage};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "pulse", about = "Self-hosted booking analytics API")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Init tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pulse=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(Some(&cli.config))?;

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        db = %config.database.path.display(),
        cache_ttl_secs = config.cache.ttl_secs,
        "starting pulse"
    );

    // Setup SQLite pool
    let pool = storage::sqlite::create_pool(&config.database)?;
    storage::sqlite::init_pool(&pool).await?;
    tracing::info!("database initialized");

    let state = Arc::new(AnalyticsState::new(pool, &config.cache));

    // Spawn the cache refresher; the first cycle runs immediately so the
    // unfiltered dashboard metrics are warm from startup.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let refresher_handle = if config.refresh.enabled {
        tracing::info!(
            interval_mins = config.refresh.interval_mins,
            "cache auto-refresh enabled"
        );
        let refresher_state = state.clone();
        let refresh_config = config.refresh.clone();
        Some(tokio::spawn(async move {
            refresh::refresh_loop(
                refresher_state,
                refresh::DEFAULT_CATALOG,
                refresh_config,
                shutdown_rx,
            )
            .await;
        }))
    } else {
        None
    };

    let app = build_router(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the refresher between writes; abandon whatever remains of an
    // in-progress cycle.
    let _ = shutdown_tx.send(true);
    if let Some(handle) = refresher_handle {
        let _ = tokio::time::timeout(std::time::Duration::from_secs(5), handle).await;
    }

    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }

    tracing::info!("shutting down...");
}
