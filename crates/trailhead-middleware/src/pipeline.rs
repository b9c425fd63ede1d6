//! Fixed-order request pipeline.
//!
//! This module implements the pipeline that every request flows through.
//! Stages declare the [`Phase`] they belong to and the builder refuses any
//! arrangement that breaks the phase order.
//!
//! ## Phases
//!
//! 1. **Cors** - Origin policy, preflight short-circuit
//! 2. **Security Headers** - Protective response headers
//! 3. **Rate Limit** - Per-client admission control on the API prefix
//! 4. **Body Parse** - Query and JSON body parsing, size ceiling
//! 5. **Sanitize** - Operator and markup stripping, pollution collapse
//! 6. **Compression** - Encoding negotiation
//! 7. **Dispatch** - Resource routers
//! 8. **Fallback** - Not-found error for unclaimed requests
//!
//! The [`ErrorClassifier`] is not a phase: it always runs last and is the
//! only place an [`AppError`] becomes a response.
//!
//! ## Driver
//!
//! [`Pipeline::handle`] runs each stage's `process` in order and stops at
//! the first outcome that is not `Continue`. Exactly one response is
//! chosen, then every stage that ran gets to `finalize` it in reverse
//! order.

use crate::context::{RequestContext, REQUEST_ID_HEADER};
use crate::middleware::{Stage, StageOutcome};
use crate::stages::error_classifier::ErrorClassifier;
use crate::types::{Request, Response};
use http::HeaderValue;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::Instrument;
use trailhead_core::AppError;
use trailhead_telemetry::metrics::record_request;

/// A type-erased stage that can be stored in a vector.
pub type BoxedStage = Arc<dyn Stage>;

/// Pipeline position of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Phase {
    /// Phase 1: CORS policy and preflight
    Cors = 1,
    /// Phase 2: Protective response headers
    SecurityHeaders = 2,
    /// Phase 3: Rate limiting
    RateLimit = 3,
    /// Phase 4: Query and body parsing
    BodyParse = 4,
    /// Phase 5: Sanitization
    Sanitize = 5,
    /// Phase 6: Compression negotiation
    Compression = 6,
    /// Phase 7: Router dispatch
    Dispatch = 7,
    /// Phase 8: Not-found fallback
    Fallback = 8,
}

impl Phase {
    /// Returns the phase name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Cors => "cors",
            Self::SecurityHeaders => "security_headers",
            Self::RateLimit => "rate_limit",
            Self::BodyParse => "body_parse",
            Self::Sanitize => "sanitize",
            Self::Compression => "compression",
            Self::Dispatch => "dispatch",
            Self::Fallback => "fallback",
        }
    }

    /// Returns all phases in order.
    #[must_use]
    pub const fn all() -> [Phase; 8] {
        [
            Self::Cors,
            Self::SecurityHeaders,
            Self::RateLimit,
            Self::BodyParse,
            Self::Sanitize,
            Self::Compression,
            Self::Dispatch,
            Self::Fallback,
        ]
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors raised while assembling a pipeline or one of its stages.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A stage was added after a stage of a later phase.
    #[error("stage `{stage}` ({phase}) cannot run after phase {previous}")]
    OutOfOrder {
        /// The offending stage.
        stage: &'static str,
        /// Its phase.
        phase: Phase,
        /// The phase already registered before it.
        previous: Phase,
    },

    /// Two stages claimed the same phase.
    #[error("phase {phase} is already occupied by `{existing}`, cannot add `{stage}`")]
    DuplicatePhase {
        /// The contested phase.
        phase: Phase,
        /// The stage already holding it.
        existing: &'static str,
        /// The rejected stage.
        stage: &'static str,
    },

    /// A configured header name or value is not valid HTTP.
    #[error("invalid header `{name}`: {reason}")]
    InvalidHeader {
        /// Header name as configured.
        name: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A router mount prefix is unusable.
    #[error("invalid mount prefix `{prefix}`: {reason}")]
    InvalidPrefix {
        /// Prefix as given.
        prefix: String,
        /// What was wrong with it.
        reason: String,
    },
}

impl PipelineError {
    pub(crate) fn invalid_header(name: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::InvalidHeader {
            name: name.into(),
            reason: reason.to_string(),
        }
    }
}

/// The request pipeline.
///
/// Immutable once built and shared behind `Arc` across concurrent requests.
///
/// # Example
///
/// ```
/// use trailhead_middleware::pipeline::Pipeline;
/// use trailhead_middleware::stages::not_found::NotFound;
///
/// let pipeline = Pipeline::builder().stage(NotFound).build().unwrap();
/// assert_eq!(pipeline.stage_names(), vec!["not_found"]);
/// ```
pub struct Pipeline {
    stages: Vec<BoxedStage>,
    classifier: ErrorClassifier,
    trust_proxy: bool,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .field("classifier", &self.classifier)
            .field("trust_proxy", &self.trust_proxy)
            .finish()
    }
}

impl Pipeline {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Processes a request through the entire pipeline.
    ///
    /// `peer` is the socket address of the connection, if known. Always
    /// returns exactly one response.
    pub async fn handle(&self, request: Request, peer: Option<SocketAddr>) -> Response {
        let mut ctx = RequestContext::from_request(&request, peer, self.trust_proxy);
        let span = tracing::info_span!(
            "request",
            request_id = %ctx.request_id(),
            method = %ctx.method(),
            url = %ctx.original_url(),
        );

        let response = self.run(&mut ctx, request).instrument(span).await;
        self.log_completion(&ctx, &response);
        response
    }

    /// Runs the stages against an existing context.
    ///
    /// Exposed for callers that build the [`RequestContext`] themselves.
    pub async fn run(&self, ctx: &mut RequestContext, mut request: Request) -> Response {
        let mut ran = 0;
        let mut chosen = None;

        for stage in &self.stages {
            ran += 1;
            match stage.process(ctx, &mut request).await {
                StageOutcome::Continue => {}
                StageOutcome::Respond(response) => {
                    if ctx.claim_response() {
                        tracing::debug!(stage = stage.name(), status = response.status().as_u16(), "stage responded");
                        chosen = Some(response);
                    } else {
                        tracing::warn!(stage = stage.name(), "response already claimed, dropping stage response");
                    }
                    break;
                }
                StageOutcome::Fail(error) => {
                    tracing::debug!(stage = stage.name(), error = %error, "stage failed");
                    chosen = Some(self.respond_with_error(ctx, &error));
                    break;
                }
            }
        }

        let mut response = match chosen {
            Some(response) => response,
            None => {
                let error = AppError::internal("no stage produced a response");
                self.respond_with_error(ctx, &error)
            }
        };

        for stage in self.stages[..ran].iter().rev() {
            response = stage.finalize(ctx, response).await;
        }

        if let Ok(value) = HeaderValue::from_str(&ctx.request_id().to_string()) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        response
    }

    fn respond_with_error(&self, ctx: &mut RequestContext, error: &AppError) -> Response {
        match self.classifier.classify(ctx, error) {
            Some(response) => response,
            None => {
                tracing::error!(error = %error, "error raised after the response was claimed");
                self.classifier.render(error)
            }
        }
    }

    fn log_completion(&self, ctx: &RequestContext, response: &Response) {
        let elapsed = ctx.elapsed();
        let status = response.status().as_u16();
        tracing::info!(
            request_id = %ctx.request_id(),
            method = %ctx.method(),
            url = %ctx.original_url(),
            client = %ctx.client_key(),
            status,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            requested_at = %ctx.requested_at_rfc3339(),
            "request completed"
        );
        record_request(ctx.method().as_str(), status, elapsed);
    }

    /// Returns the error classifier.
    #[must_use]
    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    /// Returns the names of all stages in order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Returns the phases of all stages in order.
    #[must_use]
    pub fn phases(&self) -> Vec<Phase> {
        self.stages.iter().map(|stage| stage.phase()).collect()
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }
}

/// Builder for constructing a [`Pipeline`].
///
/// Stages must be added in phase order, at most one per phase.
pub struct PipelineBuilder {
    stages: Vec<BoxedStage>,
    classifier: ErrorClassifier,
    trust_proxy: bool,
}

impl PipelineBuilder {
    /// Creates an empty builder with a production classifier.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            classifier: ErrorClassifier::default(),
            trust_proxy: false,
        }
    }

    /// Appends a stage.
    #[must_use]
    pub fn stage<S: Stage>(self, stage: S) -> Self {
        self.boxed_stage(Arc::new(stage))
    }

    /// Appends an already shared stage.
    #[must_use]
    pub fn boxed_stage(mut self, stage: BoxedStage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Sets the error classifier.
    #[must_use]
    pub fn classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Resolve the client address from `X-Forwarded-For`.
    #[must_use]
    pub fn trust_proxy(mut self, trust_proxy: bool) -> Self {
        self.trust_proxy = trust_proxy;
        self
    }

    /// Builds the pipeline, checking the phase order.
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        for pair in self.stages.windows(2) {
            let (previous, current) = (&pair[0], &pair[1]);
            if current.phase() == previous.phase() {
                return Err(PipelineError::DuplicatePhase {
                    phase: current.phase(),
                    existing: previous.name(),
                    stage: current.name(),
                });
            }
            if current.phase() < previous.phase() {
                return Err(PipelineError::OutOfOrder {
                    stage: current.name(),
                    phase: current.phase(),
                    previous: previous.phase(),
                });
            }
        }

        Ok(Pipeline {
            stages: self.stages,
            classifier: self.classifier,
            trust_proxy: self.trust_proxy,
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
