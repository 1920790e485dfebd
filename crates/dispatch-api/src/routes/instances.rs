//! `/api/instances` — worker registration and administrative enable/disable.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use dispatch_core::worker::Worker;
use serde::Deserialize;
use uuid::Uuid;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/instances", get(list).post(register))
        .route("/api/instances/:id", get(get_one).put(update).delete(remove))
        .route("/api/instances/:id/enable", post(enable))
        .route("/api/instances/:id/disable", post(disable))
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    name: String,
    url: String,
    #[serde(default)]
    backend: Option<String>,
}

async fn register(State(state): State<AppState>, Json(req): Json<RegisterRequest>) -> ApiResult<Json<Worker>> {
    let worker = state.dispatcher.pool.add(req.name, req.url, req.backend);
    state.worker_repo.upsert(&worker).await.map_err(ApiError::from)?;
    Ok(Json(worker))
}

async fn list(State(state): State<AppState>) -> Json<Vec<Worker>> {
    Json(state.dispatcher.pool.get_all())
}

async fn get_one(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Worker>> {
    state
        .dispatcher
        .pool
        .get(id)
        .map(Json)
        .ok_or_else(|| dispatch_core::Error::WorkerNotFound(id).into())
}

#[derive(Debug, Deserialize)]
struct UpdateRequest {
    name: Option<String>,
    url: Option<String>,
    #[serde(default)]
    backend: Option<Option<String>>,
}

async fn update(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateRequest>,
) -> ApiResult<Json<Worker>> {
    let worker = state
        .dispatcher
        .pool
        .update(id, req.name, req.url, req.backend)
        .map_err(ApiError::from)?;
    state.worker_repo.upsert(&worker).await.map_err(ApiError::from)?;
    Ok(Json(worker))
}

async fn remove(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<()> {
    state.dispatcher.pool.remove(id).map_err(ApiError::from)?;
    state.worker_repo.delete(id).await.map_err(ApiError::from)?;
    Ok(())
}

async fn enable(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Worker>> {
    let worker = state.dispatcher.pool.enable(id).map_err(ApiError::from)?;
    state.worker_repo.update_enabled(id, true).await.map_err(ApiError::from)?;
    Ok(Json(worker))
}

async fn disable(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Worker>> {
    let worker = state.dispatcher.pool.disable(id).map_err(ApiError::from)?;
    state.worker_repo.update_enabled(id, false).await.map_err(ApiError::from)?;
    Ok(Json(worker))
}
