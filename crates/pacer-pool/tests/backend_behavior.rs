//! End-to-end pool behavior against a scripted backend.
//!
//! Each test spins up a local axum server that plays a fixed sequence
//! of HTTP statuses, then drives real jobs through the pool.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;

use pacer_core::{Config, Job, JobResult};
use pacer_pool::{PoolConfig, WorkerPool};

/// Replays `statuses` in order, repeating the last one forever.
#[derive(Clone)]
struct Script {
    hits: Arc<AtomicU32>,
    statuses: Arc<Vec<u16>>,
}

async fn chat_completions(State(script): State<Script>) -> axum::response::Response {
    let hit = script.hits.fetch_add(1, Ordering::SeqCst) as usize;
    let status = script.statuses[hit.min(script.statuses.len() - 1)];

    if status == 200 {
        Json(json!({
            "choices": [{"message": {"content": "a generated answer"}}],
            "usage": {"prompt_tokens": 5, "completion_tokens": 10}
        }))
        .into_response()
    } else {
        (
            StatusCode::from_u16(status).unwrap(),
            "upstream unavailable".to_string(),
        )
            .into_response()
    }
}

async fn spawn_backend(statuses: Vec<u16>) -> (String, Arc<AtomicU32>) {
    let hits = Arc::new(AtomicU32::new(0));
    let script = Script {
        hits: hits.clone(),
        statuses: Arc::new(statuses),
    };
    let app = Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .with_state(script);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}/v1/chat/completions"), hits)
}

fn pool_for(endpoint: &str) -> WorkerPool {
    WorkerPool::new(PoolConfig {
        endpoint: endpoint.to_string(),
        initial_concurrency: 2,
        max_concurrency: 4,
        queue_capacity: 8,
        request_timeout: Duration::from_secs(5),
    })
}

async fn collect_results(pool: &WorkerPool, n: usize, deadline: Duration) -> Vec<JobResult> {
    let start = tokio::time::Instant::now();
    let mut out = Vec::new();
    while out.len() < n && start.elapsed() < deadline {
        if let Some(result) = pool.get_result(Duration::from_millis(200)).await {
            out.push(result);
        }
    }
    out
}

#[tokio::test]
async fn five_jobs_all_succeed_with_token_accounting() {
    let (endpoint, _hits) = spawn_backend(vec![200]).await;
    let pool = pool_for(&endpoint);
    pool.start().await;

    let config = Config::default();
    let mut submitted_ids = Vec::new();
    for i in 0..5 {
        let job = Job::new(format!("prompt number {i}"), &config);
        submitted_ids.push(job.job_id.clone());
        assert!(pool.submit(job).await);
    }

    let results = collect_results(&pool, 5, Duration::from_secs(15)).await;
    assert_eq!(results.len(), 5);
    assert!(results.iter().all(|r| r.success));

    // Every submitted id comes back exactly once.
    let mut returned: Vec<String> = results.iter().map(|r| r.job_id.clone()).collect();
    returned.sort();
    submitted_ids.sort();
    assert_eq!(returned, submitted_ids);

    let total_tokens_out: u64 = results.iter().map(|r| r.tokens_out).sum();
    assert_eq!(total_tokens_out, 50);

    for r in &results {
        assert_eq!(r.tokens_in, 5);
        assert_eq!(r.http_status, Some(200));
        assert!(r.finished_at >= r.started_at);
    }

    pool.stop().await;
}

#[tokio::test]
async fn rate_limited_twice_then_succeeds_on_third_attempt() {
    let (endpoint, hits) = spawn_backend(vec![429, 429, 200]).await;
    let pool = pool_for(&endpoint);
    pool.start().await;

    let job = Job::new("please answer", &Config::default());
    let job_id = job.job_id.clone();
    assert!(pool.submit(job).await);

    // Two backoffs (1–2s, then 2–3s) before the third attempt.
    let results = collect_results(&pool, 1, Duration::from_secs(20)).await;
    assert_eq!(results.len(), 1);
    assert!(results[0].success);
    assert_eq!(results[0].job_id, job_id);
    assert_eq!(hits.load(Ordering::SeqCst), 3);

    pool.stop().await;
}

#[tokio::test]
async fn server_errors_exhaust_retries() {
    let (endpoint, hits) = spawn_backend(vec![500]).await;
    let pool = pool_for(&endpoint);
    pool.start().await;

    assert!(pool.submit(Job::new("doomed", &Config::default())).await);

    let results = collect_results(&pool, 1, Duration::from_secs(20)).await;
    assert_eq!(results.len(), 1);

    let r = &results[0];
    assert!(!r.success);
    assert_eq!(r.http_status, Some(500));
    let error_text = r.error_text.as_deref().unwrap();
    assert!(!error_text.is_empty());
    assert!(error_text.chars().count() <= 500);
    // One failed job still records its prompt word count.
    assert_eq!(r.tokens_in, 1);
    assert_eq!(r.tokens_out, 0);
    assert_eq!(hits.load(Ordering::SeqCst), 3);

    pool.stop().await;
}

#[tokio::test]
async fn client_error_fails_without_retry() {
    let (endpoint, hits) = spawn_backend(vec![404]).await;
    let pool = pool_for(&endpoint);
    pool.start().await;

    assert!(pool.submit(Job::new("nope", &Config::default())).await);

    let results = collect_results(&pool, 1, Duration::from_secs(10)).await;
    assert_eq!(results.len(), 1);
    assert!(!results[0].success);
    assert_eq!(results[0].http_status, Some(404));
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    pool.stop().await;
}

#[tokio::test]
async fn connection_refused_becomes_failed_result() {
    // Grab a port, then close it so connects are refused.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let pool = pool_for(&format!("http://{addr}/v1/chat/completions"));
    pool.start().await;

    assert!(pool.submit(Job::new("unreachable", &Config::default())).await);

    let results = collect_results(&pool, 1, Duration::from_secs(20)).await;
    assert_eq!(results.len(), 1);
    assert!(!results[0].success);
    assert_eq!(results[0].http_status, None);
    assert!(results[0].error_text.is_some());

    pool.stop().await;
}

#[tokio::test]
async fn backpressure_bounds_pending_work_under_load() {
    let (endpoint, _hits) = spawn_backend(vec![200]).await;
    let pool = WorkerPool::new(PoolConfig {
        endpoint,
        initial_concurrency: 1,
        max_concurrency: 1,
        queue_capacity: 2,
        request_timeout: Duration::from_secs(5),
    });
    // Deliberately not started: nothing drains the queue.

    let config = Config::default();
    assert!(pool.submit(Job::new("first", &config)).await);
    assert!(pool.submit(Job::new("second", &config)).await);
    assert!(!pool.submit(Job::new("rejected", &config)).await);
    assert_eq!(pool.queue_depth().await, 2);
}
