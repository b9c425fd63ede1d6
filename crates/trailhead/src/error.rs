//! Facade error type.

use thiserror::Error;
use trailhead_config::ConfigError;
use trailhead_middleware::PipelineError;
use trailhead_telemetry::TelemetryError;

/// Errors raised while assembling an [`App`](crate::App) or its telemetry.
#[derive(Debug, Error)]
pub enum TrailheadError {
    /// The configuration failed validation or could not be mapped to a stage.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A stage or the pipeline itself rejected its setup.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// Logging or metrics could not be installed.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
}

/// Result type for facade operations.
pub type TrailheadResult<T> = Result<T, TrailheadError>;
