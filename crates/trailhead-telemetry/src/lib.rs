//! Observability for Trailhead.
//!
//! - **Logging**: `tracing-subscriber` registry with an `EnvFilter`, JSON
//!   output in production and pretty output in development
//! - **Metrics**: request, rate-limit, error and payload counters via the
//!   `metrics` facade, optionally exported in Prometheus format
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `trailhead_requests_total` | Counter | `method`, `status` | Completed requests |
//! | `trailhead_request_duration_seconds` | Histogram | `method` | Pipeline latency |
//! | `trailhead_rate_limited_total` | Counter | - | Requests rejected by the rate limiter |
//! | `trailhead_errors_total` | Counter | `kind` | Errors rendered by the classifier |
//! | `trailhead_payload_rejected_total` | Counter | `reason` | Bodies rejected while parsing |
//!
//! # Example
//!
//! ```rust,ignore
//! use trailhead_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let config = TelemetryConfig::builder()
//!     .service_name("natours")
//!     .metrics_addr("0.0.0.0:9090")
//!     .build();
//!
//! init_telemetry(&config)?;
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;

pub use config::{TelemetryConfig, TelemetryConfigBuilder};
pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig};
pub use metrics::{init_metrics, MetricsConfig};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Initializes logging, then metrics.
///
/// Call once at startup. A global subscriber or recorder installed earlier
/// makes this fail with the corresponding [`TelemetryError`].
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryResult<()> {
    init_logging(&config.logging)?;
    init_metrics(&config.metrics)?;

    tracing::info!(
        service = %config.service_name,
        json = config.logging.json_format,
        metrics = config.metrics.enabled,
        "telemetry initialized"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_telemetry_is_a_no_op() {
        let config = TelemetryConfig::builder()
            .logging(LogConfig {
                enabled: false,
                ..LogConfig::default()
            })
            .metrics(MetricsConfig::disabled())
            .build();
        assert!(init_telemetry(&config).is_ok());
    }
}
