//! Error classifier and responder.
//!
//! The classifier is the single place where an [`AppError`] becomes a
//! response. It always runs last and answers according to the
//! [`DeploymentMode`] it was built with.
//!
//! # Response Bodies
//!
//! Development exposes everything:
//!
//! ```json
//! {
//!   "status": "error",
//!   "error": { "message": "...", "statusCode": 500, "isOperational": false, "...": "..." },
//!   "message": "...",
//!   "stack": "AppError: ...\n    at src/lib.rs:10:5"
//! }
//! ```
//!
//! Production sends `{status, message}` for operational errors and for
//! translated defects. Anything else gets the generic body with a 500 and
//! is logged instead of sent.
//!
//! # Example
//!
//! ```
//! use trailhead_middleware::stages::error_classifier::ErrorClassifier;
//! use trailhead_core::{DefectTranslations, DeploymentMode};
//!
//! let classifier = ErrorClassifier::new(DeploymentMode::Production, DefectTranslations::default());
//! assert!(!classifier.mode().is_development());
//! ```

use crate::context::RequestContext;
use crate::types::{Response, ResponseExt};
use http::StatusCode;
use trailhead_core::{AppError, DefectTranslations, DeploymentMode, ErrorBody};
use trailhead_telemetry::metrics::record_error;

/// Metric label for operational errors.
const OPERATIONAL: &str = "operational";

/// Metric label for defects with no translation.
const UNCLASSIFIED: &str = "unclassified";

/// Converts errors into client-appropriate responses.
#[derive(Debug, Clone, Default)]
pub struct ErrorClassifier {
    mode: DeploymentMode,
    translations: DefectTranslations,
}

impl ErrorClassifier {
    /// Creates a classifier for the given mode and translation table.
    #[must_use]
    pub fn new(mode: DeploymentMode, translations: DefectTranslations) -> Self {
        Self { mode, translations }
    }

    /// Returns the deployment mode.
    #[must_use]
    pub fn mode(&self) -> DeploymentMode {
        self.mode
    }

    /// Returns the defect translation table.
    #[must_use]
    pub fn translations(&self) -> &DefectTranslations {
        &self.translations
    }

    /// Claims the request's response slot and renders the error.
    ///
    /// Returns `None` when a response was already claimed for this request.
    pub fn classify(&self, ctx: &mut RequestContext, error: &AppError) -> Option<Response> {
        if !ctx.claim_response() {
            tracing::debug!(request_id = %ctx.request_id(), "response already claimed, classifier declines");
            return None;
        }
        Some(self.render(error))
    }

    /// Renders the error without touching any request state.
    pub fn render(&self, error: &AppError) -> Response {
        if self.mode.is_development() {
            self.render_development(error)
        } else {
            self.render_production(error)
        }
    }

    fn render_development(&self, error: &AppError) -> Response {
        let label = match error.defect_kind() {
            Some(kind) => kind.name(),
            None if error.is_operational() => OPERATIONAL,
            None => UNCLASSIFIED,
        };
        record_error(label);

        if error.is_operational() {
            tracing::warn!(status = error.status_code().as_u16(), error = %error, "operational error");
        } else {
            tracing::error!(error = %error, trace = %error.trace(), "request failed");
        }
        Response::json(error.status_code(), &ErrorBody::detailed(error))
    }

    fn render_production(&self, error: &AppError) -> Response {
        if let Some(translated) = self.translations.translate(error) {
            let label = error.defect_kind().map_or(UNCLASSIFIED, |kind| kind.name());
            record_error(label);
            tracing::info!(defect = label, status = translated.status_code().as_u16(), "defect translated");
            return Response::json(translated.status_code(), &ErrorBody::brief(&translated));
        }

        if error.is_operational() {
            record_error(OPERATIONAL);
            tracing::debug!(status = error.status_code().as_u16(), error = %error, "operational error");
            return Response::json(error.status_code(), &ErrorBody::brief(error));
        }

        record_error(UNCLASSIFIED);
        tracing::error!(error = %error, trace = %error.trace(), "unclassified defect");
        Response::json(StatusCode::INTERNAL_SERVER_ERROR, &ErrorBody::generic())
    }
}
