//! Prometheus metrics exposition
//!
//! Registers and exposes the service metrics:
//!
//! - `token_refresh_total` (counter): labels `platform`, `outcome`
//! - `token_refresh_duration_seconds` (histogram): label `platform`
//! - `recovery_sweep_total` / `recovery_sweep_recovered_total` /
//!   `recovery_sweep_failed_total` (counters)
//! - `rate_limited_total` (counter): label `endpoint`
//!
//! The refresh counters and histogram are recorded inside the lifecycle
//! crates via the `metrics` facade; this module installs the recorder that
//! makes them visible.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// Configures `token_refresh_duration_seconds` with histogram buckets so it
/// renders as a Prometheus histogram (with `_bucket` lines for
/// `histogram_quantile()` queries) rather than the default summary. Bucket
/// boundaries cover 10ms up to the refresh timeout ceiling.
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full(
                "token_refresh_duration_seconds".to_string(),
            ),
            &[0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0],
        )
        .expect("failed to set histogram buckets")
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a denied request on a rate-limited endpoint.
pub fn record_rate_limited(endpoint: &'static str) {
    metrics::counter!("rate_limited_total", "endpoint" => endpoint).increment(1);
}
