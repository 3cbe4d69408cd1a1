//! Prometheus metrics exposition
//!
//! Metrics served on `/metrics`:
//!
//! - `detection_requests_total` (counter): label `status`
//! - `detection_request_duration_seconds` (histogram): label `status`
//! - `detection_attempts_total` (counter, recorded by the pool): label `outcome`
//! - `tokens_removed_total` (counter, recorded by the pool)

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// Configures `detection_request_duration_seconds` with explicit buckets so
/// it renders as a Prometheus histogram (with `_bucket` lines) rather than
/// the default summary. The range covers 5ms to 120s: a single request may
/// legitimately take minutes when the pool is deep and the inter-attempt
/// delay is at its 20s default.
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full(
                "detection_request_duration_seconds".to_string(),
            ),
            &[
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0,
            ],
        )
        .expect("failed to set histogram buckets")
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a completed inbound request with its final status code.
pub fn record_request(status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!("detection_requests_total", "status" => status_str.clone()).increment(1);
    metrics::histogram!("detection_request_duration_seconds", "status" => status_str)
        .record(duration_secs);
}
