//! pacer-pool — the job queue and worker pool.
//!
//! Accepts jobs into a bounded FIFO queue, runs a dynamically sized set
//! of concurrent workers that POST each job to the chat-completion
//! backend with bounded retries, and records every terminal outcome in
//! a ring buffer for the statistics layer.
//!
//! # Architecture
//!
//! ```text
//! submit() ──▶ pending queue (bounded, FIFO)
//!                  │ pop
//!            worker tasks (1..=max, scaled at runtime)
//!                  │ dispatch: POST + retry/backoff
//!                  ▼
//!            JobResult ──▶ ring buffer (capacity 1000)
//!                      └──▶ completed-results channel
//! ```
//!
//! Completion order is not submission order: callers correlate results
//! by `job_id`.

pub mod backend;
pub mod pool;

pub use backend::{AttemptError, BackendClient};
pub use pool::{PoolConfig, WorkerPool};
