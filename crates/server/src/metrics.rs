//! Prometheus metrics
//!
//! The recorder is installed once per process; `/metrics` renders it.

use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Latency buckets in milliseconds
const LATENCY_BUCKETS_MS: &[f64] = &[
    50.0, 100.0, 250.0, 500.0, 750.0, 1000.0, 1500.0, 2500.0, 5000.0, 10000.0,
];

/// Install the Prometheus recorder. Later calls return the same handle.
pub fn init_metrics() -> Option<PrometheusHandle> {
    HANDLE
        .get_or_try_init(|| {
            PrometheusBuilder::new()
                .set_buckets_for_metric(
                    Matcher::Suffix("_latency_ms".to_string()),
                    LATENCY_BUCKETS_MS,
                )?
                .install_recorder()
        })
        .map_err(|e| tracing::warn!(error = %e, "Metrics recorder not installed"))
        .ok()
        .cloned()
}

/// `GET /metrics`
pub async fn metrics_handler() -> impl IntoResponse {
    match HANDLE.get() {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            "metrics disabled\n".to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recorder_renders_counters() {
        let handle = init_metrics().expect("recorder installed");
        metrics::counter!("voice_test_renders_total").increment(1);
        assert!(handle.render().contains("voice_test_renders_total"));

        // Idempotent
        assert!(init_metrics().is_some());
    }
}
