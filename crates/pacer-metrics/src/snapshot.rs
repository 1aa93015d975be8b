//! Point-in-time reporting snapshot.
//!
//! This is the shape served at `GET /metrics` and pushed to live
//! subscribers: current concurrency and queue depth from the pool,
//! plus the latest window statistics normalized to per-second token
//! rates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::window::WindowStats;

/// Snapshot of the generator's externally visible state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    pub concurrency: usize,
    pub queue_depth: usize,
    pub throughput_rps: f64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub error_rate: f64,
    pub tokens_per_sec_in: f64,
    pub tokens_per_sec_out: f64,
    pub last_updated: DateTime<Utc>,
}

impl MetricsSnapshot {
    /// A zeroed snapshot, used before the first window completes.
    pub fn empty() -> Self {
        Self {
            concurrency: 0,
            queue_depth: 0,
            throughput_rps: 0.0,
            p50_ms: 0,
            p95_ms: 0,
            error_rate: 0.0,
            tokens_per_sec_in: 0.0,
            tokens_per_sec_out: 0.0,
            last_updated: Utc::now(),
        }
    }

    /// Fold window statistics and pool state into a snapshot.
    pub fn from_window(
        stats: &WindowStats,
        concurrency: usize,
        queue_depth: usize,
        window_secs: u64,
    ) -> Self {
        let secs = window_secs.max(1) as f64;
        Self {
            concurrency,
            queue_depth,
            throughput_rps: stats.throughput_rps,
            p50_ms: stats.p50_ms,
            p95_ms: stats.p95_ms,
            error_rate: stats.error_rate,
            tokens_per_sec_in: stats.tokens_in as f64 / secs,
            tokens_per_sec_out: stats.tokens_out as f64 / secs,
            last_updated: Utc::now(),
        }
    }
}
