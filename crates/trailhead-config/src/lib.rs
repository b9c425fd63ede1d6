//! Typed configuration for Trailhead.
//!
//! The pipeline is configured once at startup from [`TrailheadConfig`]:
//! - TOML and JSON configuration files
//! - Environment variable overrides
//! - Strict validation (fails on unknown fields)
//! - Layered configuration (preset → files → env)
//!
//! # Example
//!
//! ```no_run
//! use trailhead_config::{ConfigLoader, TrailheadConfig};
//!
//! # fn main() -> Result<(), trailhead_config::ConfigError> {
//! let config = ConfigLoader::new()
//!     .with_production()
//!     .with_file("trailhead.toml")?
//!     .with_env_prefix("TRAILHEAD")
//!     .load()?;
//!
//! println!("API quota: {} per {}s", config.rate_limit.max_requests, config.rate_limit.window_secs);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File Format
//!
//! ```toml
//! mode = "production"
//! trust_proxy = true
//!
//! [rate_limit]
//! max_requests = 100
//! window_secs = 3600
//! path_prefix = "/api"
//!
//! [body]
//! limit_bytes = 10240
//!
//! [sanitizer]
//! pollution_whitelist = ["duration", "price"]
//!
//! [cors]
//! allowed_origins = ["https://natours.dev"]
//!
//! [compression]
//! min_size = 1024
//! level = 6
//!
//! [errors.duplicate_key]
//! status = 409
//! message = "Duplicate field value: {value}. Please use another value!"
//!
//! [telemetry.logging]
//! level = "info"
//! format = "json"
//! ```
//!
//! # Environment Variable Overrides
//!
//! Values can be overridden with `PREFIX__SECTION__KEY` variables:
//!
//! - `TRAILHEAD__MODE=development`
//! - `TRAILHEAD__RATE_LIMIT__MAX_REQUESTS=500`
//! - `TRAILHEAD__TELEMETRY__LOGGING__LEVEL=debug`

#![warn(missing_docs)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::*;
pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::*;
