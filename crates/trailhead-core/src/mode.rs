//! Deployment mode.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Controls how much of an error the classifier exposes to clients.
///
/// The mode is decided once at startup and handed to the classifier when it
/// is constructed; nothing reads it from the process environment at request
/// time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    /// Full error details, message and trace in every error response.
    Development,
    /// Only operational errors are described; defects become a generic 500.
    #[default]
    Production,
}

impl DeploymentMode {
    /// Returns `true` in development mode.
    pub const fn is_development(self) -> bool {
        matches!(self, Self::Development)
    }

    /// Returns the lowercase name of the mode.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

impl std::fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string does not name a deployment mode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown deployment mode '{0}' (expected 'development' or 'production')")]
pub struct ParseModeError(String);

impl FromStr for DeploymentMode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            _ => Err(ParseModeError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_production() {
        assert_eq!(DeploymentMode::default(), DeploymentMode::Production);
    }

    #[test]
    fn test_from_str_accepts_short_forms() {
        assert_eq!("dev".parse(), Ok(DeploymentMode::Development));
        assert_eq!(" Production ".parse(), Ok(DeploymentMode::Production));
        assert!("staging".parse::<DeploymentMode>().is_err());
    }

    #[test]
    fn test_serde_uses_lowercase_names() {
        let json = serde_json::to_string(&DeploymentMode::Development).unwrap();
        assert_eq!(json, "\"development\"");
    }
}
