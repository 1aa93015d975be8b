//! pacer-gen — the generator orchestrator.
//!
//! Owns the configuration and the lifecycle of every other subsystem:
//! constructs the worker pool and tuner (in that order), runs the
//! result-drain and sample loops, forwards rows to the perf store when
//! one is configured, and answers submit/status calls from the HTTP
//! surface and embedding callers.

pub mod generator;

pub use generator::{Generator, Status};
