//! `/api/stats` — live counters, polled or streamed over a WebSocket at
//! roughly 1 Hz, matching the original's `websocket_endpoint` cadence.

use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use dispatch_core::job::Job;
use dispatch_core::worker::Worker;
use serde::Serialize;
use std::time::Duration;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/stats", get(get_stats))
        .route("/api/stats/ws", get(ws_upgrade))
}

#[derive(Debug, Serialize)]
struct Stats {
    queued: usize,
    running: usize,
    workers_idle: usize,
    workers_busy: usize,
    workers_offline: usize,
    workers_total: usize,
    recent_queued: Vec<Job>,
    running_jobs: Vec<Job>,
}

fn snapshot(state: &AppState) -> Stats {
    let workers = state.dispatcher.pool.get_all();
    let queued = state.dispatcher.queue.list();
    let running_jobs = state.dispatcher.running.all();

    let (mut idle, mut busy, mut offline) = (0, 0, 0);
    for w in &workers {
        match classify(w) {
            WorkerBucket::Idle => idle += 1,
            WorkerBucket::Busy => busy += 1,
            WorkerBucket::Other => offline += 1,
        }
    }

    Stats {
        queued: queued.len(),
        running: running_jobs.len(),
        workers_idle: idle,
        workers_busy: busy,
        workers_offline: offline,
        workers_total: workers.len(),
        recent_queued: queued.into_iter().take(20).collect(),
        running_jobs,
    }
}

enum WorkerBucket {
    Idle,
    Busy,
    Other,
}

fn classify(w: &Worker) -> WorkerBucket {
    use dispatch_core::worker::WorkerStatus::*;
    match w.status {
        Idle => WorkerBucket::Idle,
        Busy => WorkerBucket::Busy,
        Offline | Error | Disabled => WorkerBucket::Other,
    }
}

async fn get_stats(State(state): State<AppState>) -> Json<Stats> {
    Json(snapshot(&state))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_stream(socket, state))
}

async fn ws_stream(mut socket: WebSocket, state: AppState) {
    loop {
        let body = match serde_json::to_string(&snapshot(&state)) {
            Ok(body) => body,
            Err(_) => break,
        };
        if socket.send(Message::Text(body)).await.is_err() {
            break;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}
