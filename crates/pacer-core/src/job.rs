//! Job domain types.
//!
//! A `Job` is immutable once built and consumed exactly once by a
//! worker. A `JobResult` records the terminal outcome of a job —
//! success or exhausted retries — and is never mutated after creation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;

/// Maximum stored length of a backend error body or exception message.
const ERROR_TEXT_MAX: usize = 500;

/// A single inference request waiting for dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub prompt: String,
    pub model_id: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Build a job with a fresh id and the configured defaults.
    pub fn new(prompt: impl Into<String>, config: &Config) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            prompt: prompt.into(),
            model_id: config.model_id.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            created_at: Utc::now(),
        }
    }

    /// Whitespace word count of the prompt, used as the `tokens_in`
    /// fallback when the backend reports no usage.
    pub fn prompt_token_estimate(&self) -> u64 {
        self.prompt.split_whitespace().count() as u64
    }
}

/// Terminal outcome of one job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobResult {
    pub job_id: String,
    pub success: bool,
    pub latency_ms: u64,
    pub tokens_in: u64,
    pub tokens_out: u64,
    /// HTTP status of the final attempt; `None` for network-level failures.
    pub http_status: Option<u16>,
    /// Backend error body or exception message, truncated to 500 chars.
    pub error_text: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Truncate error text to the stored maximum, on a char boundary.
pub fn truncate_error(text: &str) -> String {
    text.chars().take(ERROR_TEXT_MAX).collect()
}
