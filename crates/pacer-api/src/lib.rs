//! pacer-api — the reporting and submission HTTP surface.
//!
//! Thin axum layer over the generator. Observers poll `/metrics` or
//! subscribe to `/events`; collaborators submit prompts via `/jobs`
//! and must handle the 429 backpressure response.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/metrics` | Current snapshot (JSON) |
//! | GET | `/metrics/prometheus` | Same gauges, Prometheus text format |
//! | GET | `/health` | Liveness check |
//! | GET | `/status` | Generator status (running, concurrency, …) |
//! | GET | `/samples` | Retained window history |
//! | GET | `/events` | SSE push: snapshot on connect, then on every update |
//! | POST | `/jobs` | Submit a prompt; 202 accepted / 429 backpressure |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use pacer_gen::Generator;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub generator: Arc<Generator>,
}

/// Build the complete API router.
pub fn build_router(generator: Arc<Generator>) -> Router {
    let state = ApiState { generator };

    Router::new()
        .route("/metrics", get(handlers::metrics))
        .route("/metrics/prometheus", get(handlers::prometheus_metrics))
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::status))
        .route("/samples", get(handlers::samples))
        .route("/events", get(handlers::events))
        .route("/jobs", post(handlers::submit_job))
        .with_state(state)
}
