//! Environment-sourced configuration.
//!
//! Every knob has a default, so `Config::from_env()` always succeeds;
//! malformed values are logged and replaced by the default. Bounds that
//! would make the pool or tuner nonsensical are caught by `validate()`.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::bail;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Runtime configuration for the generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Backend chat-completion endpoint URL.
    pub endpoint: String,
    /// Model identifier sent with every request.
    pub model_id: String,
    /// Default max_tokens per job.
    pub max_tokens: u32,
    /// Default sampling temperature per job.
    pub temperature: f64,

    /// Lower bound the tuner may scale down to.
    pub concurrency_min: usize,
    /// Upper bound the tuner and pool may scale up to.
    pub concurrency_max: usize,
    /// Worker count the pool starts with.
    pub concurrency_start: usize,

    /// Tuner constraint: target p95 latency in milliseconds.
    pub target_p95_ms: u64,
    /// Tuner constraint: target error rate (0.0–1.0).
    pub target_error_rate: f64,

    /// Trailing window used for statistics, in seconds.
    pub sample_window_sec: u64,
    /// Interval between tuning decisions, in seconds.
    pub tune_interval_sec: u64,
    /// Concurrency delta applied on a growth decision.
    pub increase_step: usize,
    /// Concurrency delta applied on a constraint violation.
    pub decrease_step: usize,

    /// Pending-queue capacity; `submit` rejects beyond this.
    pub backpressure_queue_max: usize,
    /// Per-attempt HTTP timeout, in seconds.
    pub request_timeout_sec: u64,

    /// Port for the reporting HTTP server.
    pub metrics_port: u16,
    /// Path of the embedded perf store; `None` disables persistence.
    pub perf_db_url: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:1234/v1/chat/completions".to_string(),
            model_id: "meta-llama-3-8b-instruct".to_string(),
            max_tokens: 128,
            temperature: 0.7,
            concurrency_min: 2,
            concurrency_max: 4,
            concurrency_start: 2,
            target_p95_ms: 2500,
            target_error_rate: 0.03,
            sample_window_sec: 30,
            tune_interval_sec: 15,
            increase_step: 1,
            decrease_step: 1,
            backpressure_queue_max: 8,
            request_timeout_sec: 60,
            metrics_port: 8088,
            perf_db_url: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// defaults for unset or malformed values.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            endpoint: env_string("LLM_ENDPOINT", d.endpoint),
            model_id: env_string("MODEL_ID", d.model_id),
            max_tokens: env_parse("MAX_TOKENS", d.max_tokens),
            temperature: env_parse("TEMPERATURE", d.temperature),
            concurrency_min: env_parse("CONCURRENCY_MIN", d.concurrency_min),
            concurrency_max: env_parse("CONCURRENCY_MAX", d.concurrency_max),
            concurrency_start: env_parse("CONCURRENCY_START", d.concurrency_start),
            target_p95_ms: env_parse("TARGET_P95_MS", d.target_p95_ms),
            target_error_rate: env_parse("TARGET_ERROR_RATE", d.target_error_rate),
            sample_window_sec: env_parse("SAMPLE_WINDOW_SEC", d.sample_window_sec),
            tune_interval_sec: env_parse("TUNE_INTERVAL_SEC", d.tune_interval_sec),
            increase_step: env_parse("INCREASE_STEP", d.increase_step),
            decrease_step: env_parse("DECREASE_STEP", d.decrease_step),
            backpressure_queue_max: env_parse("BACKPRESSURE_QUEUE_MAX", d.backpressure_queue_max),
            request_timeout_sec: env_parse("REQUEST_TIMEOUT_SEC", d.request_timeout_sec),
            metrics_port: env_parse("METRICS_PORT", d.metrics_port),
            perf_db_url: std::env::var("PERF_DB_URL").ok().map(PathBuf::from),
        }
    }

    /// Reject configurations the pool or tuner cannot operate under.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.concurrency_min < 1 {
            bail!("CONCURRENCY_MIN must be at least 1");
        }
        if self.concurrency_min > self.concurrency_max {
            bail!(
                "CONCURRENCY_MIN ({}) exceeds CONCURRENCY_MAX ({})",
                self.concurrency_min,
                self.concurrency_max
            );
        }
        if self.concurrency_start < self.concurrency_min
            || self.concurrency_start > self.concurrency_max
        {
            bail!(
                "CONCURRENCY_START ({}) outside [{}, {}]",
                self.concurrency_start,
                self.concurrency_min,
                self.concurrency_max
            );
        }
        if self.backpressure_queue_max < 1 {
            bail!("BACKPRESSURE_QUEUE_MAX must be at least 1");
        }
        if self.sample_window_sec == 0 || self.tune_interval_sec == 0 {
            bail!("SAMPLE_WINDOW_SEC and TUNE_INTERVAL_SEC must be nonzero");
        }
        Ok(())
    }

    /// Per-attempt request timeout as a `Duration`.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_sec)
    }

    /// Trailing statistics window as a `Duration`.
    pub fn sample_window(&self) -> Duration {
        Duration::from_secs(self.sample_window_sec)
    }

    /// Tuning interval as a `Duration`.
    pub fn tune_interval(&self) -> Duration {
        Duration::from_secs(self.tune_interval_sec)
    }
}

fn env_string(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parse<T: FromStr + std::fmt::Display>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(%key, %raw, %default, "unparseable value, using default");
                default
            }
        },
        Err(_) => default,
    }
}
