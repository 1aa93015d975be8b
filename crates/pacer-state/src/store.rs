//! PerfStore — redb-backed persistence for perf runs.
//!
//! Opening a store begins a new run; `record_job` and `record_sample`
//! append rows under that run's key prefix. The store supports both
//! on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;
use uuid::Uuid;

use pacer_core::JobResult;
use pacer_metrics::WindowStats;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe perf store backed by redb. One instance = one run.
#[derive(Clone)]
pub struct PerfStore {
    db: Arc<Database>,
    run: RunRecord,
    sample_seq: Arc<AtomicU64>,
}

impl PerfStore {
    /// Open (or create) a persistent store at the given path and begin
    /// a new run for `model_id`.
    pub fn open(path: &Path, model_id: &str) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::init(Arc::new(db), model_id)?;
        debug!(?path, run_id = %store.run.run_id, "perf store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory(model_id: &str) -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::init(Arc::new(db), model_id)?;
        debug!(run_id = %store.run.run_id, "in-memory perf store opened");
        Ok(store)
    }

    fn init(db: Arc<Database>, model_id: &str) -> StateResult<Self> {
        let run = RunRecord {
            run_id: Uuid::new_v4().to_string(),
            model_id: model_id.to_string(),
            host: hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "unknown".to_string()),
            notes: "automated performance run".to_string(),
            started_at: Utc::now(),
            finished_at: None,
        };

        let store = Self {
            db,
            run,
            sample_seq: Arc::new(AtomicU64::new(0)),
        };
        store.ensure_tables()?;
        store.put_run(&store.run)?;
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(RUNS).map_err(map_err!(Table))?;
        txn.open_table(JOBS).map_err(map_err!(Table))?;
        txn.open_table(SAMPLES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Identifier of the run this store instance records under.
    pub fn run_id(&self) -> &str {
        &self.run.run_id
    }

    // ── Runs ───────────────────────────────────────────────────────

    fn put_run(&self, run: &RunRecord) -> StateResult<()> {
        let value = serde_json::to_vec(run).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(RUNS).map_err(map_err!(Table))?;
            table
                .insert(run.run_id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get a run by id.
    pub fn get_run(&self, run_id: &str) -> StateResult<Option<RunRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RUNS).map_err(map_err!(Table))?;
        match table.get(run_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let run: RunRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(run))
            }
            None => Ok(None),
        }
    }

    /// Stamp the run's `finished_at`.
    pub fn finish_run(&self) -> StateResult<()> {
        let mut run = self
            .get_run(&self.run.run_id)?
            .ok_or_else(|| StateError::NotFound(self.run.run_id.clone()))?;
        run.finished_at = Some(Utc::now());
        self.put_run(&run)?;
        debug!(run_id = %run.run_id, "run finished");
        Ok(())
    }

    // ── Jobs ───────────────────────────────────────────────────────

    /// Record one job outcome under the current run.
    pub fn record_job(&self, result: &JobResult) -> StateResult<()> {
        let record = JobRecord {
            run_id: self.run.run_id.clone(),
            job_id: result.job_id.clone(),
            started_at: result.started_at,
            finished_at: result.finished_at,
            latency_ms: result.latency_ms,
            model_id: self.run.model_id.clone(),
            prompt_tokens: result.tokens_in,
            completion_tokens: result.tokens_out,
            success: result.success,
            http_status: result.http_status,
            error_text: result.error_text.clone(),
        };
        let key = record.table_key();
        let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(JOBS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// List recorded jobs for the current run.
    pub fn list_jobs(&self, limit: usize) -> StateResult<Vec<JobRecord>> {
        self.list_jobs_for(&self.run.run_id, limit)
    }

    /// List recorded jobs for any run (by key prefix scan).
    pub fn list_jobs_for(&self, run_id: &str, limit: usize) -> StateResult<Vec<JobRecord>> {
        let prefix = format!("{run_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(JOBS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let record: JobRecord =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(record);
                if results.len() >= limit {
                    break;
                }
            }
        }
        Ok(results)
    }

    // ── Samples ────────────────────────────────────────────────────

    /// Record one window sample under the current run.
    pub fn record_sample(
        &self,
        stats: &WindowStats,
        concurrency: usize,
        queue_depth: usize,
    ) -> StateResult<()> {
        let window_sec = (stats.window_end - stats.window_start).num_seconds().max(0) as u64;
        let record = SampleRecord {
            run_id: self.run.run_id.clone(),
            seq: self.sample_seq.fetch_add(1, Ordering::SeqCst),
            ts: Utc::now(),
            window_sec,
            concurrency,
            queue_depth,
            throughput_rps: stats.throughput_rps,
            p50_ms: stats.p50_ms,
            p95_ms: stats.p95_ms,
            error_rate: stats.error_rate,
            tokens_in: stats.tokens_in,
            tokens_out: stats.tokens_out,
        };
        let key = record.table_key();
        let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SAMPLES).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// List recorded samples for the current run, in capture order.
    pub fn list_samples(&self, limit: usize) -> StateResult<Vec<SampleRecord>> {
        let prefix = format!("{}:", self.run.run_id);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SAMPLES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let record: SampleRecord =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(record);
                if results.len() >= limit {
                    break;
                }
            }
        }
        Ok(results)
    }

    // ── Summary ────────────────────────────────────────────────────

    /// Aggregate view of the current run.
    pub fn run_summary(&self) -> StateResult<RunSummary> {
        let jobs = self.list_jobs(usize::MAX)?;
        let samples = self.list_samples(usize::MAX)?;

        let total_jobs = jobs.len() as u64;
        let avg_latency_ms = if jobs.is_empty() {
            0.0
        } else {
            jobs.iter().map(|j| j.latency_ms as f64).sum::<f64>() / jobs.len() as f64
        };
        let max_latency_ms = jobs.iter().map(|j| j.latency_ms).max().unwrap_or(0);
        let total_tokens = jobs.iter().map(|j| j.completion_tokens).sum();

        let best = samples.iter().max_by(|a, b| {
            a.throughput_rps
                .partial_cmp(&b.throughput_rps)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(RunSummary {
            run_id: self.run.run_id.clone(),
            model_id: self.run.model_id.clone(),
            host: self.run.host.clone(),
            started_at: self.run.started_at,
            total_jobs,
            avg_latency_ms,
            max_latency_ms,
            total_tokens,
            best_throughput_rps: best.map(|s| s.throughput_rps).unwrap_or(0.0),
            best_concurrency: best.map(|s| s.concurrency).unwrap_or(0),
            best_p95_ms: best.map(|s| s.p95_ms).unwrap_or(0),
        })
    }
}
