//! Configuration schema types.
//!
//! One struct per section. Every section rejects unknown fields and fills
//! missing ones from its defaults, so a file only has to name what it
//! changes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Message returned when a client exhausts its quota.
pub const DEFAULT_RATE_LIMIT_MESSAGE: &str =
    "Too many requests from this IP, Please try again in an hour!";

/// Fixed-window rate limiting for the API prefix.
///
/// # Example
///
/// ```
/// use trailhead_config::RateLimitConfig;
///
/// let config = RateLimitConfig::default();
/// assert_eq!(config.max_requests, 100);
/// assert_eq!(config.window_secs, 3600);
/// assert_eq!(config.path_prefix, "/api");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Enable the limiter.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Requests allowed per client address per window.
    #[serde(default = "default_max_requests")]
    pub max_requests: u64,

    /// Window length in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Only paths under this prefix are limited (segment-aware).
    #[serde(default = "default_api_prefix")]
    pub path_prefix: String,

    /// Message of the 429 error.
    #[serde(default = "default_rate_limit_message")]
    pub message: String,

    /// Attach `X-RateLimit-*` headers to limited-path responses.
    #[serde(default = "default_true")]
    pub headers: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
            path_prefix: default_api_prefix(),
            message: default_rate_limit_message(),
            headers: true,
        }
    }
}

fn default_max_requests() -> u64 {
    100
}

fn default_window_secs() -> u64 {
    60 * 60
}

fn default_api_prefix() -> String {
    "/api".to_string()
}

fn default_rate_limit_message() -> String {
    DEFAULT_RATE_LIMIT_MESSAGE.to_string()
}

/// Request body parsing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BodyConfig {
    /// Largest accepted body in bytes.
    #[serde(default = "default_body_limit")]
    pub limit_bytes: usize,
}

impl Default for BodyConfig {
    fn default() -> Self {
        Self {
            limit_bytes: default_body_limit(),
        }
    }
}

fn default_body_limit() -> usize {
    10 * 1024
}

/// Query, body and header sanitization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SanitizerConfig {
    /// Remove `$`-prefixed and dotted keys.
    #[serde(default = "default_true")]
    pub strip_operators: bool,

    /// Escape `<` in string values.
    #[serde(default = "default_true")]
    pub escape_markup: bool,

    /// Collapse repeated query parameters to their last value.
    #[serde(default = "default_true")]
    pub collapse_pollution: bool,

    /// Query parameters allowed to repeat.
    #[serde(default = "default_pollution_whitelist")]
    pub pollution_whitelist: Vec<String>,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            strip_operators: true,
            escape_markup: true,
            collapse_pollution: true,
            pollution_whitelist: default_pollution_whitelist(),
        }
    }
}

fn default_pollution_whitelist() -> Vec<String> {
    [
        "duration",
        "ratingsQuantity",
        "ratingsAverage",
        "maxGroupSize",
        "difficulty",
        "price",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Cross-origin resource sharing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins; `"*"` allows any origin.
    #[serde(default = "default_any_origin")]
    pub allowed_origins: Vec<String>,

    /// Methods advertised in preflight responses.
    #[serde(default = "default_cors_methods")]
    pub allowed_methods: Vec<String>,

    /// Headers advertised in preflight responses. Empty reflects the
    /// request's `Access-Control-Request-Headers`.
    #[serde(default)]
    pub allowed_headers: Vec<String>,

    /// Headers exposed to the browser.
    #[serde(default)]
    pub expose_headers: Vec<String>,

    /// Send `Access-Control-Allow-Credentials: true`.
    #[serde(default)]
    pub allow_credentials: bool,

    /// Preflight cache lifetime in seconds.
    #[serde(default)]
    pub max_age_secs: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_any_origin(),
            allowed_methods: default_cors_methods(),
            allowed_headers: Vec::new(),
            expose_headers: Vec::new(),
            allow_credentials: false,
            max_age_secs: None,
        }
    }
}

fn default_any_origin() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_cors_methods() -> Vec<String> {
    ["GET", "HEAD", "PUT", "PATCH", "POST", "DELETE"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Response compression.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CompressionConfig {
    /// Enable compression.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Bodies smaller than this are sent as-is.
    #[serde(default = "default_min_size")]
    pub min_size: usize,

    /// Compression level, 0 (fastest) to 9 (smallest).
    #[serde(default = "default_compression_level")]
    pub level: u32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_size: default_min_size(),
            level: default_compression_level(),
        }
    }
}

fn default_min_size() -> usize {
    1024
}

fn default_compression_level() -> u32 {
    6
}

/// Protective response headers.
///
/// The standard protective set is always the starting point; `overrides`
/// replaces individual values, and an empty value removes that header.
///
/// ```toml
/// [security_headers.overrides]
/// content-security-policy = "default-src 'self'"
/// x-download-options = ""
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SecurityHeadersConfig {
    /// Attach the header set.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Strip `X-Powered-By` from responses.
    #[serde(default = "default_true")]
    pub remove_powered_by: bool,

    /// Header name to value, applied over the standard set.
    #[serde(default)]
    pub overrides: BTreeMap<String, String>,
}

impl Default for SecurityHeadersConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            remove_powered_by: true,
            overrides: BTreeMap::new(),
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON formatted logs (production).
    #[default]
    Json,
    /// Human-readable pretty format (development).
    Pretty,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Enable logging.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Filter directive: a level, or comma-separated `target=level` pairs.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Include source file and line in logs.
    #[serde(default)]
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_log_level(),
            format: LogFormat::default(),
            include_location: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Install the Prometheus recorder.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Standalone Prometheus listener address.
    #[serde(default)]
    pub addr: Option<String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: None,
        }
    }
}

/// Telemetry configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfigSection {
    /// Service name used in the startup log line.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for TelemetryConfigSection {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

fn default_service_name() -> String {
    "trailhead".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_defaults() {
        let config = RateLimitConfig::default();
        assert!(config.enabled);
        assert_eq!(config.max_requests, 100);
        assert_eq!(config.window_secs, 3600);
        assert_eq!(config.message, DEFAULT_RATE_LIMIT_MESSAGE);
    }

    #[test]
    fn test_rate_limit_partial_deserialize() {
        let config: RateLimitConfig = toml::from_str("max_requests = 5").unwrap();
        assert_eq!(config.max_requests, 5);
        assert_eq!(config.path_prefix, "/api");
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: Result<BodyConfig, _> = toml::from_str("limit = 1");
        assert!(result.is_err());
    }

    #[test]
    fn test_body_limit_is_ten_kib() {
        assert_eq!(BodyConfig::default().limit_bytes, 10_240);
    }

    #[test]
    fn test_pollution_whitelist_default() {
        let config = SanitizerConfig::default();
        assert_eq!(config.pollution_whitelist.len(), 6);
        assert!(config.pollution_whitelist.iter().any(|p| p == "ratingsAverage"));
        assert!(!config.pollution_whitelist.iter().any(|p| p == "sort"));
    }

    #[test]
    fn test_cors_defaults_allow_any_origin() {
        let config = CorsConfig::default();
        assert_eq!(config.allowed_origins, vec!["*"]);
        assert!(config.allowed_methods.iter().any(|m| m == "PATCH"));
        assert!(!config.allow_credentials);
    }

    #[test]
    fn test_security_header_overrides() {
        let config: SecurityHeadersConfig = toml::from_str(
            r#"
            [overrides]
            x-frame-options = "DENY"
            "#,
        )
        .unwrap();
        assert!(config.enabled);
        assert_eq!(config.overrides["x-frame-options"], "DENY");
    }

    #[test]
    fn test_log_format_deserialize() {
        let format: LogFormat = serde_json::from_str(r#""pretty""#).unwrap();
        assert_eq!(format, LogFormat::Pretty);
    }
}
