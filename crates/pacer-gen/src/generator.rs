//! Generator — lifecycle and background loops.
//!
//! Start order: worker pool, then tuner, then the two background
//! loops. Shutdown reverses it: flip the shared watch flag (tuner and
//! loops exit), await the loops up to a grace period, force-abort past
//! it, then stop the pool and stamp the perf run.
//!
//! No failure in here is fatal: a failing job becomes a `JobResult`, a
//! failing sink write is logged and skipped, and both loops keep
//! running on the next iteration.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use pacer_core::{Config, Job};
use pacer_metrics::{MetricsSnapshot, compute_window_stats};
use pacer_pool::{PoolConfig, WorkerPool};
use pacer_state::PerfStore;
use pacer_tuner::{ConcurrencyTuner, SharedHistory, TunerConfig};

/// Cadence of the snapshot/broadcast/persistence loop.
const SAMPLE_LOOP_INTERVAL: Duration = Duration::from_secs(5);

/// Poll timeout for the result-drain loop.
const RESULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// How long shutdown waits for the background loops before aborting.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Synchronous status view for CLIs and health checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Status {
    pub running: bool,
    pub concurrency: usize,
    pub queue_depth: usize,
    pub throughput_rps: f64,
    pub p95_ms: u64,
    pub error_rate: f64,
    pub run_id: Option<String>,
}

/// The orchestrator. Construct once, share via `Arc`.
pub struct Generator {
    config: Config,
    pool: Arc<WorkerPool>,
    tuner: Mutex<Option<ConcurrencyTuner>>,
    history: SharedHistory,
    store: Option<PerfStore>,
    snapshot: Arc<RwLock<MetricsSnapshot>>,
    events: broadcast::Sender<MetricsSnapshot>,
    shutdown_tx: watch::Sender<bool>,
    running: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Generator {
    /// Build all components from configuration. Opens the perf store
    /// when `PERF_DB_URL` is set; a store that fails to open is a
    /// startup error, not a silent disable.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        config.validate()?;

        let pool = Arc::new(WorkerPool::new(PoolConfig::from(&config)));
        let tuner = ConcurrencyTuner::new(pool.clone(), TunerConfig::from(&config));
        let history = tuner.history();

        let store = match &config.perf_db_url {
            Some(path) => {
                let store = PerfStore::open(path, &config.model_id)?;
                info!(run_id = %store.run_id(), "perf store connected");
                Some(store)
            }
            None => None,
        };

        let (events, _) = broadcast::channel(32);
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            pool,
            tuner: Mutex::new(Some(tuner)),
            history,
            store,
            snapshot: Arc::new(RwLock::new(MetricsSnapshot::empty())),
            events,
            shutdown_tx,
            running: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Start the pool, the tuner, and the background loops.
    pub async fn start(&self) {
        self.pool.start().await;

        let mut tasks = self.tasks.lock().await;

        if let Some(tuner) = self.tuner.lock().await.take() {
            tasks.push(tokio::spawn(tuner.run(self.shutdown_tx.subscribe())));
        }

        tasks.push(tokio::spawn(result_loop(
            self.pool.clone(),
            self.store.clone(),
            self.shutdown_tx.subscribe(),
        )));

        tasks.push(tokio::spawn(sample_loop(
            self.pool.clone(),
            self.store.clone(),
            self.snapshot.clone(),
            self.events.clone(),
            self.config.clone(),
            self.shutdown_tx.subscribe(),
        )));

        self.running.store(true, Ordering::Relaxed);
        info!(
            endpoint = %self.config.endpoint,
            model_id = %self.config.model_id,
            concurrency = self.pool.concurrency(),
            "generator started"
        );
    }

    /// Graceful shutdown with a bounded grace period.
    pub async fn shutdown(&self) {
        info!("shutting down generator");
        self.running.store(false, Ordering::Relaxed);
        let _ = self.shutdown_tx.send(true);

        let mut drained: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.lock().await;
            tasks.drain(..).collect()
        };

        let graceful = tokio::time::timeout(SHUTDOWN_GRACE, async {
            for handle in &mut drained {
                let _ = handle.await;
            }
        })
        .await;

        if graceful.is_err() {
            warn!(
                grace_secs = SHUTDOWN_GRACE.as_secs(),
                "graceful shutdown exceeded grace period, aborting tasks"
            );
            for handle in &drained {
                handle.abort();
            }
        }

        self.pool.stop().await;

        if let Some(store) = &self.store
            && let Err(e) = store.finish_run()
        {
            warn!(error = %e, "failed to finish perf run");
        }

        info!("generator stopped");
    }

    /// Build a job from the configured defaults and enqueue it.
    ///
    /// Never blocks: returns the new job's id, or `None` when the
    /// queue is at capacity (or the generator is not running) — the
    /// backpressure signal.
    pub async fn submit_job(&self, prompt: impl Into<String>) -> Option<String> {
        if !self.running.load(Ordering::Relaxed) {
            return None;
        }

        let job = Job::new(prompt, &self.config);
        let job_id = job.job_id.clone();
        if self.pool.submit(job).await {
            Some(job_id)
        } else {
            warn!("job queue full, backpressure active");
            None
        }
    }

    /// Current status: live pool state plus the latest cached window.
    pub async fn status(&self) -> Status {
        let snapshot = self.snapshot.read().await;
        Status {
            running: self.running.load(Ordering::Relaxed),
            concurrency: self.pool.concurrency(),
            queue_depth: self.pool.queue_depth().await,
            throughput_rps: snapshot.throughput_rps,
            p95_ms: snapshot.p95_ms,
            error_rate: snapshot.error_rate,
            run_id: self.store.as_ref().map(|s| s.run_id().to_string()),
        }
    }

    /// Latest reporting snapshot (refreshed by the sample loop).
    pub async fn snapshot(&self) -> MetricsSnapshot {
        self.snapshot.read().await.clone()
    }

    /// Subscribe to snapshot updates for push channels.
    pub fn subscribe(&self) -> broadcast::Receiver<MetricsSnapshot> {
        self.events.subscribe()
    }

    /// Handle to the tuner's retained window history.
    pub fn history(&self) -> SharedHistory {
        self.history.clone()
    }

    /// The perf store, when persistence is enabled.
    pub fn perf_store(&self) -> Option<PerfStore> {
        self.store.clone()
    }
}

/// Drain completed results: one log line per job, plus a perf row when
/// a store is configured.
async fn result_loop(
    pool: Arc<WorkerPool>,
    store: Option<PerfStore>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            result = pool.get_result(RESULT_POLL_TIMEOUT) => {
                let Some(result) = result else { continue };

                let status = if result.success { "OK" } else { "FAIL" };
                info!(
                    job_id = result.job_id.get(..8).unwrap_or(&result.job_id),
                    status,
                    latency_ms = result.latency_ms,
                    tokens_in = result.tokens_in,
                    tokens_out = result.tokens_out,
                    http_status = result.http_status,
                    "job finished"
                );

                if let Some(store) = &store
                    && let Err(e) = store.record_job(&result)
                {
                    warn!(error = %e, "failed to record job");
                }
            }
        }
    }
}

/// Every few seconds: recompute the window, refresh the shared
/// snapshot, broadcast it, and persist a sample row.
async fn sample_loop(
    pool: Arc<WorkerPool>,
    store: Option<PerfStore>,
    snapshot: Arc<RwLock<MetricsSnapshot>>,
    events: broadcast::Sender<MetricsSnapshot>,
    config: Config,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(SAMPLE_LOOP_INTERVAL) => {
                let metrics = pool.recent_metrics(config.sample_window()).await;
                let Some(stats) = compute_window_stats(&metrics, config.sample_window()) else {
                    continue;
                };

                let concurrency = pool.concurrency();
                let queue_depth = pool.queue_depth().await;
                let snap = MetricsSnapshot::from_window(
                    &stats,
                    concurrency,
                    queue_depth,
                    config.sample_window_sec,
                );

                *snapshot.write().await = snap.clone();
                // No subscribers is fine; send only fails then.
                let _ = events.send(snap);

                if let Some(store) = &store
                    && let Err(e) = store.record_sample(&stats, concurrency, queue_depth)
                {
                    warn!(error = %e, "failed to record sample");
                }
            }
        }
    }
}
