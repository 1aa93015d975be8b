//! Persisted record types for the perf store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One generator run: opened at process start, stamped on shutdown.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRecord {
    pub run_id: String,
    pub model_id: String,
    pub host: String,
    pub notes: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Terminal outcome of one job, as persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    pub run_id: String,
    pub job_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub latency_ms: u64,
    pub model_id: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub success: bool,
    pub http_status: Option<u16>,
    pub error_text: Option<String>,
}

/// One trailing-window sample with the pool state at capture time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SampleRecord {
    pub run_id: String,
    pub seq: u64,
    pub ts: DateTime<Utc>,
    pub window_sec: u64,
    pub concurrency: usize,
    pub queue_depth: usize,
    pub throughput_rps: f64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub error_rate: f64,
    pub tokens_in: u64,
    pub tokens_out: u64,
}

/// Aggregate view of a run, derived from its jobs and samples.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    pub run_id: String,
    pub model_id: String,
    pub host: String,
    pub started_at: DateTime<Utc>,
    pub total_jobs: u64,
    pub avg_latency_ms: f64,
    pub max_latency_ms: u64,
    pub total_tokens: u64,
    pub best_throughput_rps: f64,
    pub best_concurrency: usize,
    pub best_p95_ms: u64,
}

impl JobRecord {
    /// Composite key for the jobs table.
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.run_id, self.job_id)
    }
}

impl SampleRecord {
    /// Composite key for the samples table; zero-padded so iteration
    /// order matches capture order.
    pub fn table_key(&self) -> String {
        format!("{}:{:010}", self.run_id, self.seq)
    }
}
