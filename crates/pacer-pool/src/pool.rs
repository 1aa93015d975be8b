//! Worker pool — bounded queue, dynamic worker set, metrics ring.
//!
//! The pool exclusively owns the pending queue, the concurrency
//! integer, and the ring buffer; the tuner reads queue depth and
//! changes concurrency only through `scale()`. Workers are plain
//! cancellable tasks: scaling up spawns more, scaling down aborts the
//! excess (abandoning whatever request those workers had in flight).

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::sync::{Mutex, Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use pacer_core::{Config, Job, JobResult, truncate_error};

use crate::backend::{AttemptError, BackendClient};

/// Completed results kept for trailing-window statistics.
const RING_CAPACITY: usize = 1000;

/// Total delivery attempts per job, including the first.
const MAX_ATTEMPTS: u32 = 3;

/// Configuration for a worker pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Backend chat-completion endpoint URL.
    pub endpoint: String,
    /// Worker count at startup.
    pub initial_concurrency: usize,
    /// Hard upper bound on workers.
    pub max_concurrency: usize,
    /// Pending-queue capacity; `submit` rejects beyond this.
    pub queue_capacity: usize,
    /// Per-attempt HTTP timeout.
    pub request_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:1234/v1/chat/completions".to_string(),
            initial_concurrency: 2,
            max_concurrency: 4,
            queue_capacity: 8,
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl From<&Config> for PoolConfig {
    fn from(config: &Config) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            initial_concurrency: config.concurrency_start,
            max_concurrency: config.concurrency_max,
            queue_capacity: config.backpressure_queue_max,
            request_timeout: config.request_timeout(),
        }
    }
}

/// Shared state handed to each worker task.
#[derive(Clone)]
struct WorkerContext {
    client: BackendClient,
    queue: Arc<Mutex<VecDeque<Job>>>,
    queue_notify: Arc<Notify>,
    ring: Arc<Mutex<VecDeque<JobResult>>>,
    result_tx: mpsc::UnboundedSender<JobResult>,
    shutdown_rx: watch::Receiver<bool>,
}

/// Dynamically sized pool of workers draining a bounded job queue.
pub struct WorkerPool {
    config: PoolConfig,
    client: BackendClient,
    queue: Arc<Mutex<VecDeque<Job>>>,
    queue_notify: Arc<Notify>,
    ring: Arc<Mutex<VecDeque<JobResult>>>,
    result_tx: mpsc::UnboundedSender<JobResult>,
    result_rx: Mutex<mpsc::UnboundedReceiver<JobResult>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    concurrency: AtomicUsize,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl WorkerPool {
    /// Create a pool. No workers run until `start()`.
    pub fn new(config: PoolConfig) -> Self {
        let (result_tx, result_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let client = BackendClient::new(&config.endpoint, config.request_timeout);
        Self {
            config,
            client,
            queue: Arc::new(Mutex::new(VecDeque::new())),
            queue_notify: Arc::new(Notify::new()),
            ring: Arc::new(Mutex::new(VecDeque::new())),
            result_tx,
            result_rx: Mutex::new(result_rx),
            workers: Mutex::new(Vec::new()),
            concurrency: AtomicUsize::new(0),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Spawn the initial worker set.
    pub async fn start(&self) {
        let initial = self
            .config
            .initial_concurrency
            .clamp(1, self.config.max_concurrency);
        self.resize_workers(initial).await;
        self.concurrency.store(initial, Ordering::Relaxed);
        info!(concurrency = initial, "worker pool started");
    }

    /// Stop all workers, abandoning in-flight requests.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let mut workers = self.workers.lock().await;
        for handle in workers.drain(..) {
            handle.abort();
        }
        info!("worker pool stopped");
    }

    /// Enqueue a job. Returns `false` immediately when the queue is at
    /// capacity — the backpressure signal; never blocks for space.
    pub async fn submit(&self, job: Job) -> bool {
        let mut queue = self.queue.lock().await;
        if queue.len() >= self.config.queue_capacity {
            return false;
        }
        queue.push_back(job);
        drop(queue);
        self.queue_notify.notify_one();
        true
    }

    /// Pop a completed result, waiting at most `timeout`.
    pub async fn get_result(&self, timeout: Duration) -> Option<JobResult> {
        let mut rx = self.result_rx.lock().await;
        tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
    }

    /// Jobs waiting in the queue (not yet picked up by a worker).
    pub async fn queue_depth(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Current target concurrency.
    pub fn concurrency(&self) -> usize {
        self.concurrency.load(Ordering::Relaxed)
    }

    /// Maximum concurrency this pool allows.
    pub fn max_concurrency(&self) -> usize {
        self.config.max_concurrency
    }

    /// Scale to a target worker count, clamped to `[1, max]`.
    ///
    /// Scaling down aborts the excess workers; any request they had in
    /// flight is abandoned, not completed.
    pub async fn scale(&self, target: usize) {
        let target = target.clamp(1, self.config.max_concurrency);
        let current = self.concurrency.load(Ordering::Relaxed);
        if target == current {
            return;
        }
        info!(from = current, to = target, "scaling workers");
        self.resize_workers(target).await;
        self.concurrency.store(target, Ordering::Relaxed);
    }

    /// Results whose `finished_at` falls within the trailing window.
    pub async fn recent_metrics(&self, window: Duration) -> Vec<JobResult> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::seconds(0));
        let ring = self.ring.lock().await;
        ring.iter()
            .filter(|r| r.finished_at > cutoff)
            .cloned()
            .collect()
    }

    fn worker_context(&self) -> WorkerContext {
        WorkerContext {
            client: self.client.clone(),
            queue: self.queue.clone(),
            queue_notify: self.queue_notify.clone(),
            ring: self.ring.clone(),
            result_tx: self.result_tx.clone(),
            shutdown_rx: self.shutdown_rx.clone(),
        }
    }

    async fn resize_workers(&self, target: usize) {
        let mut workers = self.workers.lock().await;
        if target > workers.len() {
            for _ in workers.len()..target {
                workers.push(tokio::spawn(worker_loop(self.worker_context())));
            }
        } else {
            for handle in workers.drain(target..) {
                handle.abort();
            }
        }
    }
}

/// One worker: pop, dispatch, record, repeat until shutdown.
async fn worker_loop(ctx: WorkerContext) {
    let mut shutdown = ctx.shutdown_rx.clone();
    loop {
        if *shutdown.borrow() {
            break;
        }

        let job = ctx.queue.lock().await.pop_front();
        let Some(job) = job else {
            // Queue empty: wait for a submit, a periodic re-check, or
            // shutdown.
            tokio::select! {
                _ = ctx.queue_notify.notified() => {}
                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                _ = shutdown.changed() => {}
            }
            continue;
        };

        let result = dispatch_job(&ctx.client, &job).await;
        push_capped(&mut *ctx.ring.lock().await, result.clone());
        // The receiver only disappears during shutdown.
        let _ = ctx.result_tx.send(result);
    }
}

/// Append to the ring, evicting the oldest entry past capacity.
fn push_capped(ring: &mut VecDeque<JobResult>, result: JobResult) {
    ring.push_back(result);
    if ring.len() > RING_CAPACITY {
        ring.pop_front();
    }
}

/// Deliver one job: up to `MAX_ATTEMPTS` attempts with exponential
/// backoff plus jitter on transient failures. Every outcome — success,
/// permanent rejection, exhausted retries — becomes a `JobResult`;
/// nothing escapes to the worker loop.
async fn dispatch_job(client: &BackendClient, job: &Job) -> JobResult {
    let mut attempt: u32 = 0;
    loop {
        let started_at = Utc::now();
        let outcome = client.attempt(job).await;
        let finished_at = Utc::now();
        let latency_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;

        match outcome {
            Ok(success) => {
                debug!(
                    job_id = %job.job_id,
                    latency_ms,
                    content_chars = success.content.chars().count(),
                    "job completed"
                );
                return JobResult {
                    job_id: job.job_id.clone(),
                    success: true,
                    latency_ms,
                    tokens_in: success.tokens_in,
                    tokens_out: success.tokens_out,
                    http_status: Some(200),
                    error_text: None,
                    started_at,
                    finished_at,
                };
            }
            Err(AttemptError::Permanent { http_status, body }) => {
                return failed_result(job, latency_ms, Some(http_status), &body, started_at, finished_at);
            }
            Err(AttemptError::Transient {
                http_status,
                detail,
            }) => {
                attempt += 1;
                if attempt >= MAX_ATTEMPTS {
                    return failed_result(job, latency_ms, http_status, &detail, started_at, finished_at);
                }
                let delay = backoff_delay(attempt - 1);
                debug!(
                    job_id = %job.job_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

fn failed_result(
    job: &Job,
    latency_ms: u64,
    http_status: Option<u16>,
    error_text: &str,
    started_at: chrono::DateTime<Utc>,
    finished_at: chrono::DateTime<Utc>,
) -> JobResult {
    JobResult {
        job_id: job.job_id.clone(),
        success: false,
        latency_ms,
        tokens_in: job.prompt_token_estimate(),
        tokens_out: 0,
        http_status,
        error_text: Some(truncate_error(error_text)),
        started_at,
        finished_at,
    }
}

/// `2^attempt_index` seconds plus up to one second of jitter.
fn backoff_delay(attempt_index: u32) -> Duration {
    let base = 2u64.pow(attempt_index) as f64;
    let jitter: f64 = rand::rng().random_range(0.0..1.0);
    Duration::from_secs_f64(base + jitter)
}
