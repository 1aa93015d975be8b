//! Prometheus text exposition format.
//!
//! Renders the current snapshot as gauges for scraping by a Prometheus
//! server or compatible agent.

use crate::snapshot::MetricsSnapshot;

/// Render a snapshot into Prometheus text format.
pub fn render_prometheus(snapshot: &MetricsSnapshot) -> String {
    let mut out = String::new();

    out.push_str("# HELP pacer_concurrency Current worker concurrency.\n");
    out.push_str("# TYPE pacer_concurrency gauge\n");
    out.push_str(&format!("pacer_concurrency {}\n", snapshot.concurrency));

    out.push_str("# HELP pacer_queue_depth Jobs waiting in the pending queue.\n");
    out.push_str("# TYPE pacer_queue_depth gauge\n");
    out.push_str(&format!("pacer_queue_depth {}\n", snapshot.queue_depth));

    out.push_str("# HELP pacer_throughput_rps Completed jobs per second.\n");
    out.push_str("# TYPE pacer_throughput_rps gauge\n");
    out.push_str(&format!(
        "pacer_throughput_rps {:.2}\n",
        snapshot.throughput_rps
    ));

    out.push_str("# HELP pacer_latency_p50_ms P50 latency in milliseconds.\n");
    out.push_str("# TYPE pacer_latency_p50_ms gauge\n");
    out.push_str(&format!("pacer_latency_p50_ms {}\n", snapshot.p50_ms));

    out.push_str("# HELP pacer_latency_p95_ms P95 latency in milliseconds.\n");
    out.push_str("# TYPE pacer_latency_p95_ms gauge\n");
    out.push_str(&format!("pacer_latency_p95_ms {}\n", snapshot.p95_ms));

    out.push_str("# HELP pacer_error_rate Error rate (0.0-1.0).\n");
    out.push_str("# TYPE pacer_error_rate gauge\n");
    out.push_str(&format!("pacer_error_rate {:.4}\n", snapshot.error_rate));

    out.push_str("# HELP pacer_tokens_per_sec_in Prompt tokens per second.\n");
    out.push_str("# TYPE pacer_tokens_per_sec_in gauge\n");
    out.push_str(&format!(
        "pacer_tokens_per_sec_in {:.2}\n",
        snapshot.tokens_per_sec_in
    ));

    out.push_str("# HELP pacer_tokens_per_sec_out Completion tokens per second.\n");
    out.push_str("# TYPE pacer_tokens_per_sec_out gauge\n");
    out.push_str(&format!(
        "pacer_tokens_per_sec_out {:.2}\n",
        snapshot.tokens_per_sec_out
    ));

    out
}
