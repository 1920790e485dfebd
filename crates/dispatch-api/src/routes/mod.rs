pub mod config;
pub mod instances;
pub mod stats;
pub mod tasks;

use crate::state::AppState;
use axum::routing::get;
use axum::{Json, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Assemble the full HTTP surface named in the external-interfaces contract
/// (§6): task submission/polling/listing/cancellation/retry, worker CRUD,
/// hot config, live stats, and the root/health compatibility endpoints.
pub fn create_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .merge(tasks::router())
        .merge(instances::router())
        .merge(config::router())
        .merge(stats::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "dispatch",
        "status": "operational"
    }))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "healthy"}))
}
