//! `/api/tasks` — submission, polling, listing, cancellation and retry.
//!
//! Submission accepts either a JSON body (`{async, priority, payload}`) or a
//! multipart file upload; both funnel through [`submit_job`] so the
//! dispatch semantics (queue admission, sync pre-registration) are
//! identical regardless of transport.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Multipart, Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use dispatch_core::job::{Job, JobStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/tasks", post(submit).get(list))
        .route("/api/tasks/failed/list", get(list_failed))
        .route("/api/tasks/retry-all", post(retry_all))
        .route("/api/tasks/:id", get(get_task).delete(cancel))
        .route("/api/tasks/:id/retry", post(retry_one))
        .route("/file_parse", post(file_parse_compat))
}

fn default_priority() -> u8 {
    dispatch_core::job::DEFAULT_PRIORITY
}

#[derive(Debug, Deserialize)]
struct SubmitRequest {
    #[serde(rename = "async", default)]
    is_async: bool,
    #[serde(default = "default_priority")]
    priority: u8,
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct TaskResponse {
    task_id: Uuid,
    status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    position: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl TaskResponse {
    fn from_job(job: &Job, position: Option<usize>) -> Self {
        Self {
            task_id: job.id,
            status: job.status,
            position,
            result: job.result.clone(),
            error: job.error.clone(),
        }
    }
}

/// Enqueue `job`; if `is_async`, return immediately with its queue
/// position, else pre-register the wait signal and block for the terminal
/// record — pre-registration happens before the job becomes visible to the
/// dispatcher so a racing completion can never be missed.
async fn submit_job(state: &AppState, job: Job, is_async: bool) -> ApiResult<TaskResponse> {
    let id = job.id;
    if is_async {
        let position = state.dispatcher.submit(job).map_err(ApiError::from)?;
        let job = state.dispatcher.find_live(id).expect("just-submitted job is live");
        return Ok(TaskResponse::from_job(&job, Some(position)));
    }

    let rx = state.dispatcher.waiters.register(id);
    if let Err(e) = state.dispatcher.submit(job) {
        state.dispatcher.waiters.deregister(id);
        return Err(e.into());
    }
    let terminal = rx
        .await
        .map_err(|_| dispatch_core::Error::Other("wait signal dropped before job terminated".into()))?;
    Ok(TaskResponse::from_job(&terminal, None))
}

async fn submit(State(state): State<AppState>, Json(req): Json<SubmitRequest>) -> ApiResult<Json<TaskResponse>> {
    let job = Job::new(req.payload, req.priority, None);
    Ok(Json(submit_job(&state, job, req.is_async).await?))
}

/// Compatibility surface: decodes a multipart file upload into the job
/// payload's `file_base64`/`file_name` fields and forwards to the same
/// submission path, honoring an `async` form flag.
async fn file_parse_compat(State(state): State<AppState>, mut multipart: Multipart) -> ApiResult<Json<TaskResponse>> {
    let mut payload = serde_json::Map::new();
    let mut is_async = false;
    let mut priority: u8 = dispatch_core::job::DEFAULT_PRIORITY;
    let mut file_name: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::from(dispatch_core::Error::Other(e.to_string())))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "files" | "file" => {
                file_name = field.file_name().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::from(dispatch_core::Error::Other(e.to_string())))?;
                let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
                payload.insert("file_base64".to_string(), serde_json::Value::String(encoded));
                if let Some(fname) = &file_name {
                    payload.insert("file_name".to_string(), serde_json::Value::String(fname.clone()));
                }
            }
            "async" => {
                let text = field.text().await.unwrap_or_default();
                is_async = text == "true" || text == "1";
            }
            "priority" => {
                let text = field.text().await.unwrap_or_default();
                priority = text.parse().unwrap_or(dispatch_core::job::DEFAULT_PRIORITY);
            }
            other => {
                let text = field.text().await.unwrap_or_default();
                payload.insert(other.to_string(), serde_json::Value::String(text));
            }
        }
    }

    let job = Job::new(serde_json::Value::Object(payload), priority, file_name);
    Ok(Json(submit_job(&state, job, is_async).await?))
}

async fn get_task(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<TaskResponse>> {
    if let Some(job) = state.dispatcher.find_live(id) {
        let position = if job.status == JobStatus::Pending {
            state.dispatcher.queue.position(id)
        } else {
            None
        };
        return Ok(Json(TaskResponse::from_job(&job, position)));
    }
    let job = state
        .job_repo
        .find_by_id(id)
        .await
        .map_err(ApiError::from)?
        .ok_or(dispatch_core::Error::JobNotFound(id))?;
    Ok(Json(TaskResponse::from_job(&job, None)))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<JobStatus>,
    #[serde(default = "default_page")]
    page: u32,
    #[serde(default = "default_page_size")]
    page_size: u32,
}

fn default_page() -> u32 {
    1
}
fn default_page_size() -> u32 {
    20
}

/// `pending`/`running` are served from live state; every other status is
/// served from history, since the core is not authoritative for terminal
/// jobs.
async fn list(State(state): State<AppState>, Query(query): Query<ListQuery>) -> ApiResult<Json<Vec<TaskResponse>>> {
    let jobs = match query.status {
        Some(JobStatus::Pending) => state.dispatcher.queue.list(),
        Some(JobStatus::Running) => state.dispatcher.running.all(),
        Some(other) => state
            .job_repo
            .list_by_status(other, query.page, query.page_size)
            .await
            .map_err(ApiError::from)?,
        None => {
            let mut all = state.dispatcher.queue.list();
            all.extend(state.dispatcher.running.all());
            all
        }
    };
    Ok(Json(jobs.iter().map(|j| TaskResponse::from_job(j, None)).collect()))
}

async fn list_failed(State(state): State<AppState>) -> ApiResult<Json<Vec<TaskResponse>>> {
    let jobs = state.job_repo.list_failed().await.map_err(ApiError::from)?;
    Ok(Json(jobs.iter().map(|j| TaskResponse::from_job(j, None)).collect()))
}

async fn cancel(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<TaskResponse>> {
    let job = state.dispatcher.cancel(id).await.map_err(ApiError::from)?;
    Ok(Json(TaskResponse::from_job(&job, None)))
}

/// Requeue a single terminal-failed job, preserved in history, back onto
/// the live queue with a fresh attempt budget.
async fn retry_one(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<TaskResponse>> {
    let mut job = state
        .job_repo
        .find_by_id(id)
        .await
        .map_err(ApiError::from)?
        .ok_or(dispatch_core::Error::JobNotFound(id))?;
    if !job.status.is_terminal() {
        return Err(dispatch_core::Error::Other(format!("job {id} is not in a terminal state")).into());
    }
    job.status = JobStatus::Pending;
    job.retry_count = 0;
    job.started_at = None;
    job.completed_at = None;
    job.worker_id = None;
    job.worker_name = None;
    job.error = None;
    job.created_at = chrono::Utc::now();
    let position = state.dispatcher.submit(job.clone()).map_err(ApiError::from)?;
    Ok(Json(TaskResponse::from_job(&job, Some(position))))
}

#[derive(Debug, Serialize)]
struct RetryAllResponse {
    requeued: usize,
}

async fn retry_all(State(state): State<AppState>) -> ApiResult<Json<RetryAllResponse>> {
    let failed = state.job_repo.list_failed().await.map_err(ApiError::from)?;
    let mut requeued = 0;
    for mut job in failed {
        job.status = JobStatus::Pending;
        job.retry_count = 0;
        job.started_at = None;
        job.completed_at = None;
        job.worker_id = None;
        job.worker_name = None;
        job.error = None;
        job.created_at = chrono::Utc::now();
        if state.dispatcher.submit(job).is_ok() {
            requeued += 1;
        }
    }
    Ok(Json(RetryAllResponse { requeued }))
}
