//! pacer-state — embedded perf-run persistence.
//!
//! Backed by [redb](https://docs.rs/redb). Each process start opens a
//! new *run*; per-job outcomes and per-window samples are appended
//! under it. All values are JSON-serialized into redb's `&[u8]` value
//! columns; composite string keys (`{run_id}:{job_id}`,
//! `{run_id}:{seq}`) enable prefix scans per run.
//!
//! The store is a sink: callers record and move on. Errors are typed
//! (`StateError`) but the orchestrator logs and swallows them — a
//! failing sink never stops the pool or tuner.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::PerfStore;
pub use types::{JobRecord, RunRecord, RunSummary, SampleRecord};
