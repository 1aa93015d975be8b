//! Trailing-window statistics over completed jobs.
//!
//! Latency percentiles are taken from successful results only; the
//! error rate counts every result in the window. Throughput divides the
//! total result count by the configured window length, not the observed
//! span, so a sparse window reads as low throughput rather than high.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pacer_core::JobResult;

/// Aggregate statistics for one trailing window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WindowStats {
    pub throughput_rps: f64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub error_rate: f64,
    pub total_jobs: usize,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

/// Compute `WindowStats` over the given results.
///
/// Returns `None` when the slice is empty or contains no successful
/// result — percentiles are undefined without at least one success.
pub fn compute_window_stats(results: &[JobResult], window: Duration) -> Option<WindowStats> {
    if results.is_empty() {
        return None;
    }

    let mut latencies: Vec<u64> = results
        .iter()
        .filter(|r| r.success)
        .map(|r| r.latency_ms)
        .collect();
    if latencies.is_empty() {
        return None;
    }
    latencies.sort_unstable();

    let window_secs = window.as_secs_f64();
    let throughput_rps = results.len() as f64 / window_secs;

    let p50_ms = median(&latencies);
    let p95_ms = if latencies.len() >= 20 {
        p95_exclusive(&latencies)
    } else {
        *latencies.last().unwrap_or(&0)
    };

    let error_count = results.iter().filter(|r| !r.success).count();
    let error_rate = error_count as f64 / results.len() as f64;

    let tokens_in = results.iter().map(|r| r.tokens_in).sum();
    let tokens_out = results.iter().map(|r| r.tokens_out).sum();

    let window_end = Utc::now();
    let window_start = window_end
        - chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::seconds(0));

    Some(WindowStats {
        throughput_rps,
        p50_ms,
        p95_ms,
        error_rate,
        total_jobs: results.len(),
        tokens_in,
        tokens_out,
        window_start,
        window_end,
    })
}

/// Median of a sorted slice, truncated to whole milliseconds.
fn median(sorted: &[u64]) -> u64 {
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2
    }
}

/// The 18th of 19 twenty-quantile cut points (the 95% point) of a
/// sorted slice, with exclusive-method interpolation. Requires at
/// least 20 samples.
fn p95_exclusive(sorted: &[u64]) -> u64 {
    let n = sorted.len();
    let m = n + 1;
    let product = 19 * m;
    let j = (product / 20).clamp(1, n - 1);
    let delta = (product % 20) as f64;
    let lo = sorted[j - 1] as f64;
    let hi = sorted[j] as f64;
    ((lo * (20.0 - delta) + hi * delta) / 20.0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn result(success: bool, latency_ms: u64, tokens_in: u64, tokens_out: u64) -> JobResult {
        JobResult {
            job_id: "test".to_string(),
            success,
            latency_ms,
            tokens_in,
            tokens_out,
            http_status: Some(if success { 200 } else { 500 }),
            error_text: (!success).then(|| "backend error".to_string()),
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    const WINDOW: Duration = Duration::from_secs(30);

    #[test]
    fn empty_input_yields_none() {
        assert!(compute_window_stats(&[], WINDOW).is_none());
    }

    #[test]
    fn all_failures_yield_none() {
        let results = vec![result(false, 100, 5, 0), result(false, 200, 5, 0)];
        assert!(compute_window_stats(&results, WINDOW).is_none());
    }

    #[test]
    fn error_rate_counts_all_results() {
        // 10 results, 2 failures.
        let mut results: Vec<JobResult> =
            (0..8).map(|i| result(true, 100 + i * 10, 10, 5)).collect();
        results.push(result(false, 999, 10, 0));
        results.push(result(false, 999, 10, 0));

        let stats = compute_window_stats(&results, WINDOW).unwrap();
        assert_eq!(stats.total_jobs, 10);
        assert!((stats.error_rate - 0.2).abs() < 1e-9);
    }

    #[test]
    fn p50_is_median_of_successes_only() {
        // Successful latencies 100..170 step 10; failures carry huge
        // latencies that must not move the median.
        let mut results: Vec<JobResult> =
            (0..8).map(|i| result(true, 100 + i * 10, 10, 5)).collect();
        results.push(result(false, 99_999, 10, 0));
        results.push(result(false, 99_999, 10, 0));

        let stats = compute_window_stats(&results, WINDOW).unwrap();
        // Median of [100..170] = (130 + 140) / 2.
        assert_eq!(stats.p50_ms, 135);
    }

    #[test]
    fn p95_falls_back_to_max_below_20_samples() {
        let results: Vec<JobResult> = (0..10).map(|i| result(true, 50 + i, 1, 1)).collect();
        let stats = compute_window_stats(&results, WINDOW).unwrap();
        assert_eq!(stats.p95_ms, 59);
    }

    #[test]
    fn p95_matches_exclusive_quantiles_reference() {
        // statistics.quantiles(range(1, 101), n=20)[18] == 95.95.
        let results: Vec<JobResult> = (1..=100).map(|i| result(true, i, 1, 1)).collect();
        let stats = compute_window_stats(&results, WINDOW).unwrap();
        assert_eq!(stats.p95_ms, 95);
    }

    #[test]
    fn p95_exact_at_20_samples() {
        // statistics.quantiles(range(1, 21), n=20)[18] == 19.95.
        let results: Vec<JobResult> = (1..=20).map(|i| result(true, i, 1, 1)).collect();
        let stats = compute_window_stats(&results, WINDOW).unwrap();
        assert_eq!(stats.p95_ms, 19);
    }

    #[test]
    fn throughput_divides_by_window_length() {
        let results: Vec<JobResult> = (0..15).map(|_| result(true, 100, 1, 1)).collect();
        let stats = compute_window_stats(&results, WINDOW).unwrap();
        assert!((stats.throughput_rps - 0.5).abs() < 1e-9);
    }

    #[test]
    fn token_sums_include_failures() {
        let results = vec![
            result(true, 100, 10, 20),
            result(false, 100, 7, 0), // failed attempt still counted its prompt estimate
            result(true, 100, 3, 5),
        ];
        let stats = compute_window_stats(&results, WINDOW).unwrap();
        assert_eq!(stats.tokens_in, 20);
        assert_eq!(stats.tokens_out, 25);
    }

    #[test]
    fn single_success_window() {
        let stats = compute_window_stats(&[result(true, 42, 1, 1)], WINDOW).unwrap();
        assert_eq!(stats.p50_ms, 42);
        assert_eq!(stats.p95_ms, 42);
        assert_eq!(stats.error_rate, 0.0);
        assert_eq!(stats.total_jobs, 1);
    }
}
