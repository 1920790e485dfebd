//! `/api/config` — read and hot-update the scheduler's tunables.
//!
//! A successful PATCH swaps the whole `SchedulerConfig` reference the
//! dispatcher and executors read; in-flight executors keep using the value
//! they already loaded for the current attempt (§4.8).

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::State;
use axum::routing::{get, patch};
use axum::{Json, Router};
use dispatch_core::config::{SchedulerConfig, SchedulerConfigUpdate};
use std::sync::Arc;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/config", get(get_config).patch(patch_config))
}

async fn get_config(State(state): State<AppState>) -> Json<SchedulerConfig> {
    Json(state.dispatcher.config.load_full())
}

async fn patch_config(
    State(state): State<AppState>,
    Json(update): Json<SchedulerConfigUpdate>,
) -> ApiResult<Json<SchedulerConfig>> {
    let current = state.dispatcher.config.load_full();
    let next = current.merge(&update).map_err(ApiError::from)?;
    state.config_repo.save(&next).await.map_err(ApiError::from)?;
    state.dispatcher.config.store(Arc::new(next.clone()));
    Ok(Json(next))
}
