//! Metrics and observability utilities
//!
//! Run, batch, and vector counters under a common prefix. Installing an
//! exporter is left to the binary; without one the calls are no-ops.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all PreprintBot metrics
pub const METRICS_PREFIX: &str = "preprintbot";

/// Buckets for whole-run latency (in seconds)
pub const RUN_BUCKETS: &[f64] = &[
    0.100,  // 100ms
    0.500,  // 500ms
    1.000,  // 1s
    5.000,  // 5s
    15.00,  // 15s
    30.00,  // 30s
    60.00,  // 1m
    300.0,  // 5m
    900.0,  // 15m
];

/// Buckets for one candidate batch
pub const BATCH_BUCKETS: &[f64] = &[
    0.001,  // 1ms
    0.005,  // 5ms
    0.025,  // 25ms
    0.100,  // 100ms
    0.250,  // 250ms
    1.000,  // 1s
    5.000,  // 5s
];

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_runs_total", METRICS_PREFIX),
        Unit::Count,
        "Total recommendation runs by method and final status"
    );

    describe_histogram!(
        format!("{}_run_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Recommendation run latency in seconds"
    );

    describe_gauge!(
        format!("{}_run_recommendations", METRICS_PREFIX),
        Unit::Count,
        "Rows written by the last persisted run"
    );

    describe_counter!(
        format!("{}_candidate_batches_total", METRICS_PREFIX),
        Unit::Count,
        "Candidate batches scored"
    );

    describe_histogram!(
        format!("{}_batch_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Similarity computation latency per candidate batch"
    );

    describe_counter!(
        format!("{}_degenerate_vectors_total", METRICS_PREFIX),
        Unit::Count,
        "Zero-magnitude vectors skipped during matching"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record run metrics
pub struct RunMetrics {
    start: Instant,
    method: String,
}

impl RunMetrics {
    /// Start tracking a run
    pub fn start(method: &str) -> Self {
        Self {
            start: Instant::now(),
            method: method.to_string(),
        }
    }

    /// Record run completion
    pub fn finish(self, status: &str, recommendations: usize) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_runs_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_run_duration_seconds", METRICS_PREFIX),
            "method" => self.method.clone()
        )
        .record(duration);

        if status == "persisted" {
            gauge!(
                format!("{}_run_recommendations", METRICS_PREFIX),
                "method" => self.method
            )
            .set(recommendations as f64);
        }
    }
}

/// Helper to record one scored candidate batch
pub fn record_batch(duration_secs: f64, method: &str, vectors: usize) {
    counter!(
        format!("{}_candidate_batches_total", METRICS_PREFIX),
        "method" => method.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_batch_duration_seconds", METRICS_PREFIX),
        "method" => method.to_string()
    )
    .record(duration_secs);

    tracing::trace!(vectors, "Batch metrics recorded");
}

/// Helper to record skipped zero-magnitude vectors
pub fn record_degenerate(count: u64) {
    if count > 0 {
        counter!(format!("{}_degenerate_vectors_total", METRICS_PREFIX)).increment(count);
    }
}
