//! Main configuration types.
//!
//! This module provides the top-level [`TrailheadConfig`] struct and its builder.

use serde::{Deserialize, Serialize};
use trailhead_core::{DefectTranslations, DeploymentMode};

use crate::{
    BodyConfig, CompressionConfig, ConfigError, CorsConfig, LogFormat, RateLimitConfig,
    SanitizerConfig, SecurityHeadersConfig, TelemetryConfigSection,
};

/// Complete pipeline configuration.
///
/// Loaded once at startup with [`ConfigLoader`](crate::ConfigLoader); the
/// pipeline never re-reads it.
///
/// # Example
///
/// ```
/// use trailhead_config::TrailheadConfig;
/// use trailhead_core::DeploymentMode;
///
/// let config = TrailheadConfig::default();
/// assert_eq!(config.mode, DeploymentMode::Production);
/// assert_eq!(config.body.limit_bytes, 10 * 1024);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct TrailheadConfig {
    /// Error rendering mode.
    #[serde(default)]
    pub mode: DeploymentMode,

    /// Resolve the client address from `X-Forwarded-For`.
    ///
    /// Off by default. Deployments behind a reverse proxy or platform router
    /// must turn it on, or every client shares the proxy's address and one
    /// rate-limit window.
    #[serde(default)]
    pub trust_proxy: bool,

    /// Rate limiting.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Body parsing.
    #[serde(default)]
    pub body: BodyConfig,

    /// Sanitization.
    #[serde(default)]
    pub sanitizer: SanitizerConfig,

    /// CORS policy.
    #[serde(default)]
    pub cors: CorsConfig,

    /// Response compression.
    #[serde(default)]
    pub compression: CompressionConfig,

    /// Protective headers.
    #[serde(default)]
    pub security_headers: SecurityHeadersConfig,

    /// Defect translation rules.
    #[serde(default)]
    pub errors: DefectTranslations,

    /// Logging and metrics.
    #[serde(default)]
    pub telemetry: TelemetryConfigSection,
}

impl TrailheadConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> TrailheadConfigBuilder {
        TrailheadConfigBuilder::new()
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if:
    /// - The rate-limit window or quota is zero
    /// - The rate-limit prefix does not start with `/`
    /// - The body limit is zero
    /// - The compression level is above 9
    /// - A translation rule has a non-4xx status
    /// - The log filter names an unknown level
    /// - The metrics address is not a socket address
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit.window_secs == 0 {
            return Err(ConfigError::invalid_value(
                "rate_limit.window_secs",
                "must be greater than 0",
            ));
        }
        if self.rate_limit.max_requests == 0 {
            return Err(ConfigError::invalid_value(
                "rate_limit.max_requests",
                "must be greater than 0",
            ));
        }
        if !self.rate_limit.path_prefix.starts_with('/') {
            return Err(ConfigError::invalid_value(
                "rate_limit.path_prefix",
                format!("must start with '/': {}", self.rate_limit.path_prefix),
            ));
        }

        if self.body.limit_bytes == 0 {
            return Err(ConfigError::invalid_value(
                "body.limit_bytes",
                "must be greater than 0",
            ));
        }

        if self.compression.level > 9 {
            return Err(ConfigError::invalid_value(
                "compression.level",
                "must be between 0 and 9",
            ));
        }

        if let Err(e) = self.errors.check() {
            return Err(ConfigError::invalid_value(
                format!("errors.{}", e.rule),
                e.to_string(),
            ));
        }

        if !is_valid_log_filter(&self.telemetry.logging.level) {
            return Err(ConfigError::invalid_value(
                "telemetry.logging.level",
                format!("unknown level in '{}'", self.telemetry.logging.level),
            ));
        }

        if let Some(addr) = &self.telemetry.metrics.addr {
            if addr.parse::<std::net::SocketAddr>().is_err() {
                return Err(ConfigError::invalid_value(
                    "telemetry.metrics.addr",
                    format!("invalid socket address: {addr}"),
                ));
            }
        }

        Ok(())
    }

    /// Development preset: detailed error bodies and pretty debug logs.
    ///
    /// # Example
    ///
    /// ```
    /// use trailhead_config::TrailheadConfig;
    ///
    /// let config = TrailheadConfig::development();
    /// assert!(config.mode.is_development());
    /// assert_eq!(config.telemetry.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();

        config.mode = DeploymentMode::Development;

        config.telemetry.logging.level = "debug".to_string();
        config.telemetry.logging.format = LogFormat::Pretty;
        config.telemetry.logging.include_location = true;

        config
    }

    /// Production preset: generic defect bodies and JSON logs.
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();

        config.mode = DeploymentMode::Production;

        config.telemetry.logging.level = "info".to_string();
        config.telemetry.logging.format = LogFormat::Json;
        config.telemetry.logging.include_location = false;

        config
    }
}

/// Accepts `level` or comma-separated `target=level` directives.
fn is_valid_log_filter(filter: &str) -> bool {
    const LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

    !filter.trim().is_empty()
        && filter.split(',').all(|directive| {
            let level = directive.rsplit_once('=').map_or(directive, |(_, level)| level);
            LEVELS.contains(&level.trim().to_ascii_lowercase().as_str())
        })
}

/// Builder for [`TrailheadConfig`].
#[derive(Debug, Default)]
pub struct TrailheadConfigBuilder {
    mode: Option<DeploymentMode>,
    trust_proxy: Option<bool>,
    rate_limit: Option<RateLimitConfig>,
    body: Option<BodyConfig>,
    sanitizer: Option<SanitizerConfig>,
    cors: Option<CorsConfig>,
    compression: Option<CompressionConfig>,
    security_headers: Option<SecurityHeadersConfig>,
    errors: Option<DefectTranslations>,
    telemetry: Option<TelemetryConfigSection>,
}

impl TrailheadConfigBuilder {
    /// Create a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the deployment mode.
    #[must_use]
    pub fn mode(mut self, mode: DeploymentMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Trust `X-Forwarded-For` for the client address.
    #[must_use]
    pub fn trust_proxy(mut self, trust: bool) -> Self {
        self.trust_proxy = Some(trust);
        self
    }

    /// Set the rate limit configuration.
    #[must_use]
    pub fn rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    /// Set the body configuration.
    #[must_use]
    pub fn body(mut self, body: BodyConfig) -> Self {
        self.body = Some(body);
        self
    }

    /// Set the sanitizer configuration.
    #[must_use]
    pub fn sanitizer(mut self, sanitizer: SanitizerConfig) -> Self {
        self.sanitizer = Some(sanitizer);
        self
    }

    /// Set the CORS configuration.
    #[must_use]
    pub fn cors(mut self, cors: CorsConfig) -> Self {
        self.cors = Some(cors);
        self
    }

    /// Set the compression configuration.
    #[must_use]
    pub fn compression(mut self, compression: CompressionConfig) -> Self {
        self.compression = Some(compression);
        self
    }

    /// Set the security header configuration.
    #[must_use]
    pub fn security_headers(mut self, security_headers: SecurityHeadersConfig) -> Self {
        self.security_headers = Some(security_headers);
        self
    }

    /// Set the defect translation rules.
    #[must_use]
    pub fn errors(mut self, errors: DefectTranslations) -> Self {
        self.errors = Some(errors);
        self
    }

    /// Set the telemetry configuration.
    #[must_use]
    pub fn telemetry(mut self, telemetry: TelemetryConfigSection) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Build the configuration.
    ///
    /// Any unset sections will use their default values.
    #[must_use]
    pub fn build(self) -> TrailheadConfig {
        TrailheadConfig {
            mode: self.mode.unwrap_or_default(),
            trust_proxy: self.trust_proxy.unwrap_or_default(),
            rate_limit: self.rate_limit.unwrap_or_default(),
            body: self.body.unwrap_or_default(),
            sanitizer: self.sanitizer.unwrap_or_default(),
            cors: self.cors.unwrap_or_default(),
            compression: self.compression.unwrap_or_default(),
            security_headers: self.security_headers.unwrap_or_default(),
            errors: self.errors.unwrap_or_default(),
            telemetry: self.telemetry.unwrap_or_default(),
        }
    }

    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if validation fails.
    pub fn build_validated(self) -> Result<TrailheadConfig, ConfigError> {
        let config = self.build();
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = TrailheadConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.trust_proxy);
        assert_eq!(config.rate_limit.max_requests, 100);
    }

    #[test]
    fn test_builder_sections() {
        let config = TrailheadConfig::builder()
            .mode(DeploymentMode::Development)
            .trust_proxy(true)
            .rate_limit(RateLimitConfig {
                max_requests: 3,
                ..Default::default()
            })
            .build();

        assert!(config.mode.is_development());
        assert!(config.trust_proxy);
        assert_eq!(config.rate_limit.max_requests, 3);
        assert_eq!(config.body, BodyConfig::default());
    }

    #[test]
    fn test_validate_zero_window() {
        let err = TrailheadConfig::builder()
            .rate_limit(RateLimitConfig {
                window_secs: 0,
                ..Default::default()
            })
            .build_validated()
            .unwrap_err();
        assert!(err.to_string().contains("rate_limit.window_secs"));
    }

    #[test]
    fn test_validate_zero_quota() {
        let err = TrailheadConfig::builder()
            .rate_limit(RateLimitConfig {
                max_requests: 0,
                ..Default::default()
            })
            .build_validated()
            .unwrap_err();
        assert!(err.to_string().contains("rate_limit.max_requests"));
    }

    #[test]
    fn test_validate_relative_prefix() {
        let err = TrailheadConfig::builder()
            .rate_limit(RateLimitConfig {
                path_prefix: "api".to_string(),
                ..Default::default()
            })
            .build_validated()
            .unwrap_err();
        assert!(err.to_string().contains("path_prefix"));
    }

    #[test]
    fn test_validate_zero_body_limit() {
        let err = TrailheadConfig::builder()
            .body(BodyConfig { limit_bytes: 0 })
            .build_validated()
            .unwrap_err();
        assert!(err.to_string().contains("body.limit_bytes"));
    }

    #[test]
    fn test_validate_translation_status() {
        let mut errors = DefectTranslations::default();
        errors.duplicate_key.status = 302;
        let err = TrailheadConfig::builder()
            .errors(errors)
            .build_validated()
            .unwrap_err();
        assert!(err.to_string().contains("errors.duplicate_key"));
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = TrailheadConfig::default();
        config.telemetry.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        config.telemetry.logging.level = "trailhead_middleware=debug,warn".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_metrics_addr() {
        let mut config = TrailheadConfig::default();
        config.telemetry.metrics.addr = Some("nowhere".to_string());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("telemetry.metrics.addr"));
    }

    #[test]
    fn test_presets() {
        let dev = TrailheadConfig::development();
        assert_eq!(dev.mode, DeploymentMode::Development);
        assert_eq!(dev.telemetry.logging.format, LogFormat::Pretty);
        assert!(dev.telemetry.logging.include_location);

        let prod = TrailheadConfig::production();
        assert_eq!(prod.mode, DeploymentMode::Production);
        assert_eq!(prod.telemetry.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_toml_round_trip_keeps_sections() {
        let config = TrailheadConfig::development();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("mode = \"development\""));
        assert!(toml_str.contains("[rate_limit]"));
        assert!(toml_str.contains("[errors.malformed_id]"));

        let parsed: TrailheadConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_unknown_top_level_field_rejected() {
        let result: Result<TrailheadConfig, _> = toml::from_str("node_env = \"production\"");
        assert!(result.is_err());
    }
}
