//! Telemetry bootstrap from the application configuration.

use crate::error::TrailheadResult;
use trailhead_config::{LogFormat, TrailheadConfig};
use trailhead_telemetry::{LogConfig, MetricsConfig, TelemetryConfig};

/// Maps the `telemetry` section onto the telemetry crate's configuration.
pub fn telemetry_config(config: &TrailheadConfig) -> TelemetryConfig {
    let section = &config.telemetry;

    let logging = LogConfig {
        enabled: section.logging.enabled,
        level: section.logging.level.clone(),
        json_format: section.logging.format == LogFormat::Json,
        file_line_info: section.logging.include_location,
        include_target: true,
    };

    let metrics = if section.metrics.enabled {
        MetricsConfig {
            addr: section.metrics.addr.clone(),
            ..MetricsConfig::default()
        }
    } else {
        MetricsConfig::disabled()
    };

    TelemetryConfig::builder()
        .service_name(&section.service_name)
        .logging(logging)
        .metrics(metrics)
        .build()
}

/// Installs logging and metrics as configured.
///
/// Call once, before building the [`App`](crate::App). With a metrics
/// address this must run inside a tokio runtime.
pub fn init_telemetry(config: &TrailheadConfig) -> TrailheadResult<()> {
    trailhead_telemetry::init_telemetry(&telemetry_config(config))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_maps_to_json_logs() {
        let telemetry = telemetry_config(&TrailheadConfig::production());
        assert!(telemetry.logging.json_format);
        assert_eq!(telemetry.logging.level, "info");
        assert!(!telemetry.logging.file_line_info);
        assert_eq!(telemetry.service_name, "trailhead");
    }

    #[test]
    fn test_development_maps_to_pretty_debug_logs() {
        let telemetry = telemetry_config(&TrailheadConfig::development());
        assert!(!telemetry.logging.json_format);
        assert_eq!(telemetry.logging.level, "debug");
        assert!(telemetry.logging.file_line_info);
    }

    #[test]
    fn test_metrics_section() {
        let mut config = TrailheadConfig::default();
        config.telemetry.metrics.addr = Some("127.0.0.1:9100".to_string());
        assert_eq!(
            telemetry_config(&config).metrics.addr.as_deref(),
            Some("127.0.0.1:9100")
        );

        config.telemetry.metrics.enabled = false;
        assert!(!telemetry_config(&config).metrics.enabled);
    }
}
