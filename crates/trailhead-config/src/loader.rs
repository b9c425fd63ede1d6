//! Configuration loader with layered approach.
//!
//! This module provides the [`ConfigLoader`] for loading configuration from
//! multiple sources: presets, files, and environment variables.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

use serde_json::Value;

use crate::{ConfigError, LogFormat, TrailheadConfig};

/// Configuration loader with layered approach.
///
/// Layers apply in call order, later ones overriding earlier ones:
/// 1. Default values or a preset
/// 2. Configuration files and strings (TOML or JSON), merged key by key
/// 3. Environment variables, applied by [`load`](Self::load)
///
/// # Example
///
/// ```no_run
/// use trailhead_config::ConfigLoader;
///
/// # fn main() -> Result<(), trailhead_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_production()
///     .with_optional_file("trailhead.toml")?
///     .with_dotenv()?
///     .with_env_prefix("TRAILHEAD")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    config: TrailheadConfig,
    env_prefix: Option<String>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new configuration loader seeded with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: TrailheadConfig::default(),
            env_prefix: None,
        }
    }

    /// Start with default configuration values.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        self.config = TrailheadConfig::default();
        self
    }

    /// Start with the development preset.
    ///
    /// # Example
    ///
    /// ```
    /// use trailhead_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_development()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.telemetry.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = TrailheadConfig::development();
        self
    }

    /// Start with the production preset.
    #[must_use]
    pub fn with_production(mut self) -> Self {
        self.config = TrailheadConfig::production();
        self
    }

    /// Merge a configuration file over the current layers.
    ///
    /// Supports TOML (.toml) and JSON (.json), chosen by extension. Keys the
    /// file does not mention keep their current values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - The file does not exist
    /// - The file cannot be read
    /// - The file contains invalid TOML/JSON
    /// - The file contains unknown fields
    pub fn with_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);

        match extension.as_deref() {
            Some(format @ ("toml" | "json")) => self.with_string(&content, format),
            _ => Err(ConfigError::validation_error(format!(
                "unsupported configuration file format: {}",
                path.display()
            ))),
        }
    }

    /// Merge a configuration file if it exists; otherwise continue unchanged.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be read or parsed.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Merge configuration from a string.
    ///
    /// `format` is `"toml"` or `"json"`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if parsing fails or the merged result no longer
    /// matches the schema.
    ///
    /// # Example
    ///
    /// ```
    /// use trailhead_config::ConfigLoader;
    ///
    /// let toml = r#"
    ///     [rate_limit]
    ///     max_requests = 10
    /// "#;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string(toml, "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.rate_limit.max_requests, 10);
    /// assert_eq!(config.rate_limit.window_secs, 3600);
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        let overlay: Value = match format.to_lowercase().as_str() {
            "toml" => toml::from_str(content)?,
            "json" => serde_json::from_str(content)?,
            _ => {
                return Err(ConfigError::validation_error(format!(
                    "unsupported configuration format: {format}"
                )))
            }
        };

        let mut merged = serde_json::to_value(&self.config)?;
        merge_values(&mut merged, overlay);
        self.config = serde_json::from_value(merged)?;
        Ok(self)
    }

    /// Set environment variable prefix for overrides.
    ///
    /// Environment variables use the format `PREFIX__SECTION__KEY`, for
    /// example with prefix "TRAILHEAD":
    /// - `TRAILHEAD__MODE=development`
    /// - `TRAILHEAD__RATE_LIMIT__MAX_REQUESTS=500`
    /// - `TRAILHEAD__SANITIZER__POLLUTION_WHITELIST=price,duration`
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Load a `.env` file into the process environment, if one exists.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a `.env` file exists but cannot be parsed.
    pub fn with_dotenv(self) -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(_) => Ok(self),
            Err(e) if e.not_found() => Ok(self),
            Err(e) => Err(ConfigError::validation_error(format!(
                "failed to load .env file: {e}"
            ))),
        }
    }

    /// Finalize and return the loaded configuration.
    ///
    /// Applies environment variable overrides (if a prefix was set) and
    /// validates the final configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if an environment variable does not parse or
    /// validation fails.
    pub fn load(mut self) -> Result<TrailheadConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            self.apply_env_overrides(&prefix)?;
        }

        self.config.validate()?;

        Ok(self.config)
    }

    /// Finalize without applying the environment or validating.
    #[must_use]
    pub fn load_unvalidated(self) -> TrailheadConfig {
        self.config
    }

    fn apply_env_overrides(&mut self, prefix: &str) -> Result<(), ConfigError> {
        let env_vars: HashMap<String, String> = env::vars()
            .filter(|(k, _)| k.starts_with(prefix))
            .collect();

        for (key, value) in env_vars {
            self.apply_env_var(&key, &value, prefix)?;
        }

        Ok(())
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let Some(key_without_prefix) = key
            .strip_prefix(prefix)
            .and_then(|k| k.strip_prefix("__"))
        else {
            // Another variable that merely shares the prefix.
            return Ok(());
        };

        let parts: Vec<&str> = key_without_prefix.split("__").collect();
        let config = &mut self.config;

        match parts.as_slice() {
            ["MODE"] => {
                config.mode = value
                    .parse()
                    .map_err(|e: trailhead_core::ParseModeError| {
                        ConfigError::env_parse_error(key, e.to_string())
                    })?;
            }
            ["TRUST_PROXY"] => config.trust_proxy = bool_var(key, value)?,

            // Rate limit
            ["RATE_LIMIT", "ENABLED"] => config.rate_limit.enabled = bool_var(key, value)?,
            ["RATE_LIMIT", "MAX_REQUESTS"] => config.rate_limit.max_requests = int_var(key, value)?,
            ["RATE_LIMIT", "WINDOW_SECS"] => config.rate_limit.window_secs = int_var(key, value)?,
            ["RATE_LIMIT", "PATH_PREFIX"] => config.rate_limit.path_prefix = value.to_string(),
            ["RATE_LIMIT", "MESSAGE"] => config.rate_limit.message = value.to_string(),
            ["RATE_LIMIT", "HEADERS"] => config.rate_limit.headers = bool_var(key, value)?,

            // Body
            ["BODY", "LIMIT_BYTES"] => config.body.limit_bytes = int_var(key, value)?,

            // Sanitizer
            ["SANITIZER", "STRIP_OPERATORS"] => {
                config.sanitizer.strip_operators = bool_var(key, value)?;
            }
            ["SANITIZER", "ESCAPE_MARKUP"] => {
                config.sanitizer.escape_markup = bool_var(key, value)?;
            }
            ["SANITIZER", "COLLAPSE_POLLUTION"] => {
                config.sanitizer.collapse_pollution = bool_var(key, value)?;
            }
            ["SANITIZER", "POLLUTION_WHITELIST"] => {
                config.sanitizer.pollution_whitelist = list_var(value);
            }

            // CORS
            ["CORS", "ALLOWED_ORIGINS"] => config.cors.allowed_origins = list_var(value),
            ["CORS", "ALLOWED_METHODS"] => config.cors.allowed_methods = list_var(value),
            ["CORS", "ALLOWED_HEADERS"] => config.cors.allowed_headers = list_var(value),
            ["CORS", "EXPOSE_HEADERS"] => config.cors.expose_headers = list_var(value),
            ["CORS", "ALLOW_CREDENTIALS"] => config.cors.allow_credentials = bool_var(key, value)?,
            ["CORS", "MAX_AGE_SECS"] => {
                config.cors.max_age_secs = if value.eq_ignore_ascii_case("none") {
                    None
                } else {
                    Some(int_var(key, value)?)
                };
            }

            // Compression
            ["COMPRESSION", "ENABLED"] => config.compression.enabled = bool_var(key, value)?,
            ["COMPRESSION", "MIN_SIZE"] => config.compression.min_size = int_var(key, value)?,
            ["COMPRESSION", "LEVEL"] => config.compression.level = int_var(key, value)?,

            // Security headers
            ["SECURITY_HEADERS", "ENABLED"] => {
                config.security_headers.enabled = bool_var(key, value)?;
            }
            ["SECURITY_HEADERS", "REMOVE_POWERED_BY"] => {
                config.security_headers.remove_powered_by = bool_var(key, value)?;
            }

            // Telemetry
            ["TELEMETRY", "SERVICE_NAME"] => config.telemetry.service_name = value.to_string(),
            ["TELEMETRY", "LOGGING", "ENABLED"] => {
                config.telemetry.logging.enabled = bool_var(key, value)?;
            }
            ["TELEMETRY", "LOGGING", "LEVEL"] => config.telemetry.logging.level = value.to_string(),
            ["TELEMETRY", "LOGGING", "FORMAT"] => {
                config.telemetry.logging.format = match value.to_lowercase().as_str() {
                    "json" => LogFormat::Json,
                    "pretty" => LogFormat::Pretty,
                    _ => {
                        return Err(ConfigError::env_parse_error(
                            key,
                            "expected 'json' or 'pretty'",
                        ))
                    }
                };
            }
            ["TELEMETRY", "METRICS", "ENABLED"] => {
                config.telemetry.metrics.enabled = bool_var(key, value)?;
            }
            ["TELEMETRY", "METRICS", "ADDR"] => {
                config.telemetry.metrics.addr = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }

            // Unknown key - ignore
            _ => {}
        }

        Ok(())
    }
}

/// Recursively overlays `overlay` onto `base`; objects merge, anything else
/// replaces.
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn bool_var(key: &str, value: &str) -> Result<bool, ConfigError> {
    parse_bool(value).ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))
}

fn int_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::env_parse_error(key, "expected integer"))
}

fn list_var(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Parse a boolean from a string.
fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
