//! Error types for Trailhead.
//!
//! [`AppError`] is the one error type that travels through the request
//! pipeline. Stages and resource routers create it at the point of failure;
//! the error classifier consumes it exactly once and renders an
//! [`ErrorBody`].
//!
//! # Operational vs defect
//!
//! | Kind | Built with | Production response |
//! |---|---|---|
//! | operational | [`AppError::new`] and the status helpers | `{status, message}` with its own status |
//! | translated defect | [`AppError::defect`] | translated by [`DefectTranslations`](crate::DefectTranslations) |
//! | unclassified defect | [`AppError::internal`], [`AppError::from_source`] | generic 500 |

use crate::defect::DefectKind;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::panic::Location;
use thiserror::Error;

/// Result type alias using [`AppError`].
pub type AppResult<T> = Result<T, AppError>;

/// Message sent for unclassified defects in production.
pub const GENERIC_MESSAGE: &str = "Something went very wrong!";

/// Status class of an error response, derived from the HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorStatus {
    /// The client did something wrong (4xx).
    Fail,
    /// The server failed (everything else).
    Error,
}

impl ErrorStatus {
    /// Derives the class from a status code: 4xx is `fail`, anything else `error`.
    #[must_use]
    pub fn from_status_code(status: StatusCode) -> Self {
        if status.is_client_error() {
            Self::Fail
        } else {
            Self::Error
        }
    }

    /// Returns the wire name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fail => "fail",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ErrorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured request-processing error.
///
/// Every constructor is `#[track_caller]`, so the error remembers the source
/// location that created it. [`AppError::trace`] renders that location
/// together with the source chain for development responses and logs.
///
/// # Example
///
/// ```
/// use http::StatusCode;
/// use trailhead_core::{AppError, ErrorStatus};
///
/// let err = AppError::new("No tour found with that ID", StatusCode::NOT_FOUND);
/// assert!(err.is_operational());
/// assert_eq!(err.status(), ErrorStatus::Fail);
/// ```
#[derive(Error, Debug)]
#[error("{message}")]
pub struct AppError {
    message: String,
    status_code: Option<StatusCode>,
    operational: bool,
    defect: Option<DefectKind>,
    origin: &'static Location<'static>,
    #[source]
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Creates an operational error: a failure the client is allowed to see.
    #[track_caller]
    #[must_use]
    pub fn new(message: impl Into<String>, status: StatusCode) -> Self {
        Self {
            message: message.into(),
            status_code: Some(status),
            operational: true,
            defect: None,
            origin: Location::caller(),
            source: None,
        }
    }

    /// Operational `400 Bad Request`.
    #[track_caller]
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(message, StatusCode::BAD_REQUEST)
    }

    /// Operational `404 Not Found`.
    #[track_caller]
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(message, StatusCode::NOT_FOUND)
    }

    /// Operational `413 Payload Too Large`.
    #[track_caller]
    #[must_use]
    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(message, StatusCode::PAYLOAD_TOO_LARGE)
    }

    /// Operational `429 Too Many Requests`.
    #[track_caller]
    #[must_use]
    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::new(message, StatusCode::TOO_MANY_REQUESTS)
    }

    /// Wraps a collaborator defect the classifier knows how to translate.
    ///
    /// The error stays non-operational until the classifier applies the
    /// configured translation rule in production.
    #[track_caller]
    #[must_use]
    pub fn defect(kind: DefectKind) -> Self {
        Self {
            message: kind.to_string(),
            status_code: None,
            operational: false,
            defect: Some(kind),
            origin: Location::caller(),
            source: None,
        }
    }

    /// Creates an unclassified defect with no status (rendered as 500).
    #[track_caller]
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: None,
            operational: false,
            defect: None,
            origin: Location::caller(),
            source: None,
        }
    }

    /// Wraps an arbitrary error as an unclassified defect, keeping it as source.
    #[track_caller]
    #[must_use]
    pub fn from_source(source: impl Into<anyhow::Error>) -> Self {
        let source = source.into();
        Self {
            message: source.to_string(),
            status_code: None,
            operational: false,
            defect: None,
            origin: Location::caller(),
            source: Some(source),
        }
    }

    /// Builds the operational error a defect translates into.
    ///
    /// The origin of the defect is kept so the trace still points at the
    /// place the collaborator failed.
    pub(crate) fn translated(
        message: String,
        status: StatusCode,
        kind: DefectKind,
        origin: &'static Location<'static>,
    ) -> Self {
        Self {
            message,
            status_code: Some(status),
            operational: true,
            defect: Some(kind),
            origin,
            source: None,
        }
    }

    /// Attaches an underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Overrides the HTTP status.
    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status_code = Some(status);
        self
    }

    /// Returns the human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the HTTP status, defaulting to 500 when none was set.
    pub fn status_code(&self) -> StatusCode {
        self.status_code.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Returns the status exactly as it was set, if at all.
    pub const fn declared_status(&self) -> Option<StatusCode> {
        self.status_code
    }

    /// Returns the status class derived from [`status_code`](Self::status_code).
    pub fn status(&self) -> ErrorStatus {
        ErrorStatus::from_status_code(self.status_code())
    }

    /// Returns `true` for failures safe to describe to clients.
    pub const fn is_operational(&self) -> bool {
        self.operational
    }

    /// Returns the translatable defect this error carries, if any.
    pub const fn defect_kind(&self) -> Option<&DefectKind> {
        self.defect.as_ref()
    }

    /// Returns the source location that created this error.
    pub const fn origin(&self) -> &'static Location<'static> {
        self.origin
    }

    /// Renders the message, origin and cause chain as a multi-line trace.
    pub fn trace(&self) -> String {
        let mut trace = format!(
            "AppError: {}\n    at {}:{}:{}",
            self.message,
            self.origin.file(),
            self.origin.line(),
            self.origin.column()
        );
        if let Some(source) = &self.source {
            for cause in source.chain() {
                trace.push_str("\nCaused by: ");
                trace.push_str(&cause.to_string());
            }
        }
        trace
    }

    /// Returns a serializable snapshot of every field.
    pub fn detail(&self) -> ErrorDetail {
        ErrorDetail {
            message: self.message.clone(),
            status_code: self.status_code().as_u16(),
            status: self.status(),
            is_operational: self.operational,
            defect: self.defect.clone(),
            origin: format!("{}:{}", self.origin.file(), self.origin.line()),
            source: self.source.as_ref().map(|s| format!("{s:#}")),
        }
    }
}

impl From<anyhow::Error> for AppError {
    #[track_caller]
    fn from(source: anyhow::Error) -> Self {
        Self::from_source(source)
    }
}

/// Serializable view of an [`AppError`] used in development responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    /// Error message.
    pub message: String,
    /// Effective HTTP status.
    pub status_code: u16,
    /// Status class.
    pub status: ErrorStatus,
    /// Operational flag.
    pub is_operational: bool,
    /// Translatable defect, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defect: Option<DefectKind>,
    /// `file:line` of the constructor call.
    pub origin: String,
    /// Rendered source chain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// JSON body of every error response.
///
/// Production bodies carry only `status` and `message`; development bodies
/// add the full `error` snapshot and a `stack`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// `fail` or `error`.
    pub status: ErrorStatus,
    /// Full error snapshot (development only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    /// Client-facing message.
    pub message: String,
    /// Trace (development only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorBody {
    /// Body for an operational error: `{status, message}`.
    pub fn brief(error: &AppError) -> Self {
        Self {
            status: error.status(),
            error: None,
            message: error.message.clone(),
            stack: None,
        }
    }

    /// Body exposing everything about the error.
    pub fn detailed(error: &AppError) -> Self {
        Self {
            status: error.status(),
            error: Some(error.detail()),
            message: error.message.clone(),
            stack: Some(error.trace()),
        }
    }

    /// The generic body sent for unclassified defects in production.
    pub fn generic() -> Self {
        Self {
            status: ErrorStatus::Error,
            error: None,
            message: GENERIC_MESSAGE.to_string(),
            stack: None,
        }
    }
}
