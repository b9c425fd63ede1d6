//! Request metrics for Trailhead.
//!
//! Recording functions always go through the `metrics` facade; without an
//! installed recorder they are no-ops. [`init_metrics`] installs the
//! Prometheus recorder, optionally with its own HTTP listener.

use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

/// Completed requests, by method and status.
pub const REQUESTS_TOTAL: &str = "trailhead_requests_total";
/// Pipeline latency histogram.
pub const REQUEST_DURATION_SECONDS: &str = "trailhead_request_duration_seconds";
/// Requests rejected by the rate limiter.
pub const RATE_LIMITED_TOTAL: &str = "trailhead_rate_limited_total";
/// Errors rendered by the classifier, by kind.
pub const ERRORS_TOTAL: &str = "trailhead_errors_total";
/// Bodies rejected while parsing, by reason.
pub const PAYLOAD_REJECTED_TOTAL: &str = "trailhead_payload_rejected_total";

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsConfig {
    /// Whether to install a recorder at all.
    pub enabled: bool,

    /// Address for a standalone Prometheus listener. When `None` the
    /// recorder is installed and [`render_metrics`] serves the text format.
    pub addr: Option<String>,

    /// Histogram buckets for request duration, in seconds.
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: None,
            duration_buckets: vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
            ],
        }
    }
}

impl MetricsConfig {
    /// A configuration that installs nothing.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

/// Installs the global Prometheus recorder.
///
/// With an `addr`, the exporter's own listener is started; this must be
/// called from inside a tokio runtime.
///
/// # Errors
///
/// Returns `TelemetryError::InvalidAddress` for an unparsable address and
/// `TelemetryError::MetricsInit` if a recorder is already installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let builder = PrometheusBuilder::new()
        .set_buckets(&config.duration_buckets)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    match &config.addr {
        Some(addr) => {
            let addr: SocketAddr = addr
                .parse()
                .map_err(|e| TelemetryError::InvalidAddress(format!("{addr}: {e}")))?;
            builder
                .with_http_listener(addr)
                .install()
                .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
        }
        None => {
            let handle = builder
                .install_recorder()
                .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
            let _ = METRICS_HANDLE.set(handle);
        }
    }

    register_metric_descriptions();
    Ok(())
}

/// Renders metrics in Prometheus text format.
///
/// Returns `None` unless [`init_metrics`] installed a recorder without its
/// own listener.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn register_metric_descriptions() {
    describe_counter!(REQUESTS_TOTAL, "Total number of requests that left the pipeline");
    describe_histogram!(
        REQUEST_DURATION_SECONDS,
        "Time from pipeline entry to the finalized response, in seconds"
    );
    describe_counter!(RATE_LIMITED_TOTAL, "Requests rejected by the fixed-window rate limiter");
    describe_counter!(ERRORS_TOTAL, "Error responses rendered by the classifier");
    describe_counter!(PAYLOAD_REJECTED_TOTAL, "Request bodies rejected while parsing");
}

/// Records a completed request.
pub fn record_request(method: &str, status_code: u16, duration: Duration) {
    counter!(
        REQUESTS_TOTAL,
        "method" => method.to_string(),
        "status" => status_code.to_string()
    )
    .increment(1);

    histogram!(REQUEST_DURATION_SECONDS, "method" => method.to_string())
        .record(duration.as_secs_f64());
}

/// Records a request rejected by the rate limiter.
pub fn record_rate_limited() {
    counter!(RATE_LIMITED_TOTAL).increment(1);
}

/// Records an error response.
///
/// `kind` is `operational`, `unclassified`, or a translated defect name.
pub fn record_error(kind: &str) {
    counter!(ERRORS_TOTAL, "kind" => kind.to_string()).increment(1);
}

/// Records a rejected body (`too_large` or `malformed`).
pub fn record_payload_rejected(reason: &str) {
    counter!(PAYLOAD_REJECTED_TOTAL, "reason" => reason.to_string()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MetricsConfig::default();
        assert!(config.enabled);
        assert!(config.addr.is_none());
        assert!(!config.duration_buckets.is_empty());
    }

    #[test]
    fn test_disabled_config_installs_nothing() {
        assert!(init_metrics(&MetricsConfig::disabled()).is_ok());
    }

    #[test]
    fn test_invalid_address_is_rejected() {
        let config = MetricsConfig {
            addr: Some("not an address".to_string()),
            ..MetricsConfig::default()
        };
        assert!(matches!(
            init_metrics(&config),
            Err(TelemetryError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_record_functions_without_recorder() {
        record_request("GET", 200, Duration::from_millis(10));
        record_rate_limited();
        record_error("operational");
        record_payload_rejected("too_large");
    }
}
