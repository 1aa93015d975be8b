//! Chat-completion backend client.
//!
//! One `attempt()` call is one HTTP POST with a bounded timeout. Every
//! outcome is classified as success, transient (retryable), or
//! permanent (not retryable); the retry policy itself lives in the
//! worker's dispatch loop.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use pacer_core::Job;

/// Why a single delivery attempt failed.
#[derive(Debug, Error)]
pub enum AttemptError {
    /// HTTP 429, HTTP ≥500, network-level failures, timeouts, and
    /// malformed success bodies. Eligible for retry with backoff.
    #[error("transient backend failure: {detail}")]
    Transient {
        http_status: Option<u16>,
        detail: String,
    },

    /// Any other non-200 status. Surfaced immediately, never retried.
    #[error("permanent backend failure (HTTP {http_status})")]
    Permanent { http_status: u16, body: String },
}

/// Parsed payload of a successful attempt.
#[derive(Debug)]
pub struct AttemptSuccess {
    /// Generated completion text (`choices[0].message.content`).
    pub content: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
}

// ── Wire shapes ────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens: Option<u64>,
}

// ── Client ─────────────────────────────────────────────────────────

/// HTTP client for the single configured backend endpoint.
#[derive(Clone)]
pub struct BackendClient {
    endpoint: String,
    timeout: Duration,
    client: Client<HttpConnector, Full<Bytes>>,
}

impl BackendClient {
    /// Create a client for the given endpoint with a per-attempt timeout.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout,
            client: Client::builder(TokioExecutor::new()).build_http(),
        }
    }

    /// Perform one delivery attempt for the job.
    pub async fn attempt(&self, job: &Job) -> Result<AttemptSuccess, AttemptError> {
        let payload = ChatRequest {
            model: &job.model_id,
            messages: vec![ChatMessage {
                role: "user",
                content: &job.prompt,
            }],
            max_tokens: job.max_tokens,
            temperature: job.temperature,
        };
        let body = serde_json::to_vec(&payload).map_err(|e| AttemptError::Transient {
            http_status: None,
            detail: format!("request serialization failed: {e}"),
        })?;

        let request = http::Request::builder()
            .method(http::Method::POST)
            .uri(&self.endpoint)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| AttemptError::Transient {
                http_status: None,
                detail: format!("request build failed: {e}"),
            })?;

        let response = match tokio::time::timeout(self.timeout, self.client.request(request)).await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                return Err(AttemptError::Transient {
                    http_status: None,
                    detail: e.to_string(),
                });
            }
            Err(_) => {
                return Err(AttemptError::Transient {
                    http_status: None,
                    detail: format!("request timed out after {:?}", self.timeout),
                });
            }
        };

        let status = response.status().as_u16();
        let body = match response.into_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                return Err(AttemptError::Transient {
                    http_status: Some(status),
                    detail: format!("body read failed: {e}"),
                });
            }
        };

        if status == 200 {
            return parse_success(job, &body);
        }

        let text = String::from_utf8_lossy(&body).into_owned();
        if status == 429 || status >= 500 {
            debug!(job_id = %job.job_id, status, "retryable backend status");
            Err(AttemptError::Transient {
                http_status: Some(status),
                detail: text,
            })
        } else {
            Err(AttemptError::Permanent {
                http_status: status,
                body: text,
            })
        }
    }
}

/// Parse a 200 body. Token counts come from `usage` when present;
/// otherwise `tokens_in` falls back to the prompt's word count and
/// `tokens_out` to zero.
fn parse_success(job: &Job, body: &[u8]) -> Result<AttemptSuccess, AttemptError> {
    let parsed: ChatResponse = serde_json::from_slice(body).map_err(|e| AttemptError::Transient {
        http_status: Some(200),
        detail: format!("unparseable response body: {e}"),
    })?;

    let Some(choice) = parsed.choices.first() else {
        return Err(AttemptError::Transient {
            http_status: Some(200),
            detail: "response carried no choices".to_string(),
        });
    };

    let usage = parsed.usage.unwrap_or_default();
    Ok(AttemptSuccess {
        content: choice.message.content.clone(),
        tokens_in: usage
            .prompt_tokens
            .unwrap_or_else(|| job.prompt_token_estimate()),
        tokens_out: usage.completion_tokens.unwrap_or(0),
    })
}
