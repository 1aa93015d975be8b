//! pacer-tuner — adaptive concurrency control.
//!
//! Periodically reads trailing-window statistics from the worker pool
//! and nudges concurrency up or down, with hysteresis to avoid
//! oscillation. Decisions are taken in strict priority order:
//!
//! ```text
//! 1. constraint violation (error rate or p95 over target) → decrease
//! 2. regression after a recent change                     → revert
//! 3. sustained backlog or measured throughput improvement → increase
//! 4. otherwise                                            → hold
//! ```
//!
//! The constraint check always wins; growth needs evidence, never runs
//! unconditionally.

pub mod tuner;

pub use tuner::{ConcurrencyTuner, SharedHistory, TuneDecision, TunerConfig};
