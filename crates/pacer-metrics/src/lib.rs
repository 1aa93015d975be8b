//! pacer-metrics — statistics over completed jobs.
//!
//! Pure computation: the worker pool owns the ring buffer of
//! `JobResult`s; this crate turns a trailing slice of it into
//! `WindowStats`, folds those into the `MetricsSnapshot` served to
//! observers, and renders Prometheus text exposition.
//!
//! # Architecture
//!
//! ```text
//! [JobResult] ──compute_window_stats()──▶ WindowStats
//! WindowStats ──MetricsSnapshot::from_window()──▶ MetricsSnapshot
//! MetricsSnapshot ──render_prometheus()──▶ text/plain for scraping
//! ```

pub mod prometheus;
pub mod snapshot;
pub mod window;

pub use prometheus::render_prometheus;
pub use snapshot::MetricsSnapshot;
pub use window::{WindowStats, compute_window_stats};
