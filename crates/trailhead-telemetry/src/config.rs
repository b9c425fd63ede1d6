//! Telemetry configuration.

use crate::logging::LogConfig;
use crate::metrics::MetricsConfig;

/// Configuration for logging and metrics together.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup log line.
    pub service_name: String,

    /// Metrics configuration.
    pub metrics: MetricsConfig,

    /// Logging configuration.
    pub logging: LogConfig,
}

impl TelemetryConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> TelemetryConfigBuilder {
        TelemetryConfigBuilder::new()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "trailhead".to_string(),
            metrics: MetricsConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

/// Builder for [`TelemetryConfig`].
#[derive(Debug, Default)]
pub struct TelemetryConfigBuilder {
    service_name: Option<String>,
    metrics: Option<MetricsConfig>,
    logging: Option<LogConfig>,
}

impl TelemetryConfigBuilder {
    /// Creates a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the service name.
    #[must_use]
    pub fn service_name(mut self, name: &str) -> Self {
        self.service_name = Some(name.to_string());
        self
    }

    /// Sets the metrics configuration.
    #[must_use]
    pub fn metrics(mut self, config: MetricsConfig) -> Self {
        self.metrics = Some(config);
        self
    }

    /// Sets the logging configuration.
    #[must_use]
    pub fn logging(mut self, config: LogConfig) -> Self {
        self.logging = Some(config);
        self
    }

    /// Enables metrics and exposes them on `addr`.
    #[must_use]
    pub fn metrics_addr(mut self, addr: &str) -> Self {
        let config = self.metrics.take().unwrap_or_default();
        self.metrics = Some(MetricsConfig {
            enabled: true,
            addr: Some(addr.to_string()),
            ..config
        });
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> TelemetryConfig {
        let defaults = TelemetryConfig::default();
        TelemetryConfig {
            service_name: self.service_name.unwrap_or(defaults.service_name),
            metrics: self.metrics.unwrap_or(defaults.metrics),
            logging: self.logging.unwrap_or(defaults.logging),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "trailhead");
        assert!(config.metrics.addr.is_none());
    }

    #[test]
    fn test_metrics_addr_enables_metrics() {
        let config = TelemetryConfig::builder()
            .service_name("natours")
            .metrics(MetricsConfig::disabled())
            .metrics_addr("127.0.0.1:9100")
            .build();

        assert_eq!(config.service_name, "natours");
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.addr.as_deref(), Some("127.0.0.1:9100"));
    }
}
