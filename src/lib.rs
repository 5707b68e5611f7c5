pub mod analytics;
pub mod config;
pub mod error;
pub mod storage;

use crate::analytics::{handler, AnalyticsState};
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the HTTP router. One dynamic route serves the whole metric catalog
/// through the generic cache-aside handler.
pub fn build_router(state: Arc<AnalyticsState>) -> Router {
    Router::new()
        .route("/", get(handler::home))
        .route("/analytics/{metric}", get(handler::get_metric))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
