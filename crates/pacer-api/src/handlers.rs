//! HTTP handlers.
//!
//! Each handler reads through the shared `Generator` and returns JSON
//! (or SSE for the push channel).

use std::convert::Infallible;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use chrono::Utc;
use futures::stream::{self, Stream, StreamExt};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::debug;

use pacer_metrics::{MetricsSnapshot, render_prometheus};

use crate::ApiState;

// ── Reporting ──────────────────────────────────────────────────────

/// GET /metrics
pub async fn metrics(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.generator.snapshot().await)
}

/// GET /metrics/prometheus
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let snapshot = state.generator.snapshot().await;
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        render_prometheus(&snapshot),
    )
}

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "timestamp": Utc::now() }))
}

/// GET /status
pub async fn status(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.generator.status().await)
}

/// GET /samples
pub async fn samples(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.generator.history().recent().await)
}

// ── Push channel ───────────────────────────────────────────────────

/// GET /events — the current snapshot immediately on connect, then one
/// event per update.
pub async fn events(
    State(state): State<ApiState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let initial = state.generator.snapshot().await;
    let updates = stream::unfold(state.generator.subscribe(), |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(snapshot) => return Some((snapshot_event(&snapshot), rx)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "slow events subscriber, dropping stale snapshots");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    let stream = stream::iter([snapshot_event(&initial)]).chain(updates);
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn snapshot_event(snapshot: &MetricsSnapshot) -> Result<Event, Infallible> {
    let event = Event::default()
        .event("metrics")
        .json_data(snapshot)
        .unwrap_or_else(|_| Event::default().data("{}"));
    Ok(event)
}

// ── Submission ─────────────────────────────────────────────────────

/// Request body for POST /jobs.
#[derive(serde::Deserialize)]
pub struct SubmitRequest {
    pub prompt: String,
}

/// POST /jobs — 202 with the job id, or 429 under backpressure.
pub async fn submit_job(
    State(state): State<ApiState>,
    Json(req): Json<SubmitRequest>,
) -> impl IntoResponse {
    match state.generator.submit_job(req.prompt).await {
        Some(job_id) => (
            StatusCode::ACCEPTED,
            Json(json!({ "accepted": true, "job_id": job_id })),
        ),
        None => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "accepted": false, "error": "queue full or generator stopped" })),
        ),
    }
}
