//! CORS (Cross-Origin Resource Sharing) stage.
//!
//! Answers every `OPTIONS` request on the spot with a `204` preflight
//! response, and decorates all other responses with the allowed-origin
//! headers on the way out. This is the first phase of the pipeline, so a
//! preflight never reaches rate limiting, parsing or any router.
//!
//! ## Example
//!
//! ```
//! use trailhead_middleware::stages::cors::CorsStage;
//! use http::Method;
//! use std::time::Duration;
//!
//! let cors = CorsStage::builder()
//!     .allow_origin("https://app.example.com")
//!     .allow_methods([Method::GET, Method::POST])
//!     .allow_credentials(true)
//!     .max_age(Duration::from_secs(600))
//!     .build();
//! ```

use crate::context::RequestContext;
use crate::middleware::{BoxFuture, Stage, StageOutcome};
use crate::pipeline::Phase;
use crate::types::{Request, Response, ResponseExt};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use std::collections::HashSet;
use std::time::Duration;

/// CORS header names.
pub mod headers {
    /// `Access-Control-Allow-Origin` header.
    pub const ALLOW_ORIGIN: &str = "access-control-allow-origin";
    /// `Access-Control-Allow-Methods` header.
    pub const ALLOW_METHODS: &str = "access-control-allow-methods";
    /// `Access-Control-Allow-Headers` header.
    pub const ALLOW_HEADERS: &str = "access-control-allow-headers";
    /// `Access-Control-Allow-Credentials` header.
    pub const ALLOW_CREDENTIALS: &str = "access-control-allow-credentials";
    /// `Access-Control-Max-Age` header.
    pub const MAX_AGE: &str = "access-control-max-age";
    /// `Access-Control-Expose-Headers` header.
    pub const EXPOSE_HEADERS: &str = "access-control-expose-headers";
    /// `Access-Control-Request-Headers` header (preflight).
    pub const REQUEST_HEADERS: &str = "access-control-request-headers";
    /// `Origin` header.
    pub const ORIGIN: &str = "origin";
    /// `Vary` header.
    pub const VARY: &str = "vary";
}

/// Represents the set of allowed origins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedOrigins {
    /// Allow any origin (wildcard `*`).
    Any,
    /// Allow specific origins.
    List(HashSet<String>),
}

impl AllowedOrigins {
    /// Builds the policy from configured strings; a `*` entry means any.
    pub fn from_list<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let origins: HashSet<String> = origins.into_iter().map(Into::into).collect();
        if origins.contains("*") {
            Self::Any
        } else {
            Self::List(origins)
        }
    }

    /// Checks if an origin is allowed.
    pub fn is_allowed(&self, origin: &str) -> bool {
        match self {
            Self::Any => true,
            Self::List(origins) => origins.contains(origin),
        }
    }
}

/// Origin the request presented, kept for the finalizer.
#[derive(Debug, Clone)]
struct RequestOrigin(Option<HeaderValue>);

/// The CORS stage.
#[derive(Debug, Clone)]
pub struct CorsStage {
    allowed_origins: AllowedOrigins,
    allowed_methods: Vec<Method>,
    allowed_headers: Vec<String>,
    expose_headers: Vec<String>,
    allow_credentials: bool,
    max_age: Option<Duration>,
}

impl Default for CorsStage {
    fn default() -> Self {
        CorsBuilder::new().build()
    }
}

/// Builder for [`CorsStage`].
#[derive(Debug, Clone)]
pub struct CorsBuilder {
    stage: CorsStage,
}

impl Default for CorsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CorsBuilder {
    /// Any origin, the usual methods, request headers reflected.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stage: CorsStage {
                allowed_origins: AllowedOrigins::Any,
                allowed_methods: vec![
                    Method::GET,
                    Method::HEAD,
                    Method::PUT,
                    Method::PATCH,
                    Method::POST,
                    Method::DELETE,
                ],
                allowed_headers: Vec::new(),
                expose_headers: Vec::new(),
                allow_credentials: false,
                max_age: None,
            },
        }
    }

    /// Allows any origin (wildcard `*`).
    #[must_use]
    pub fn allow_any_origin(mut self) -> Self {
        self.stage.allowed_origins = AllowedOrigins::Any;
        self
    }

    /// Restricts to one more explicit origin.
    ///
    /// The first call switches the policy from any origin to a list.
    #[must_use]
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        match &mut self.stage.allowed_origins {
            AllowedOrigins::Any => {
                self.stage.allowed_origins = AllowedOrigins::List(HashSet::from([origin.into()]));
            }
            AllowedOrigins::List(origins) => {
                origins.insert(origin.into());
            }
        }
        self
    }

    /// Sets the origin policy.
    #[must_use]
    pub fn allowed_origins(mut self, origins: AllowedOrigins) -> Self {
        self.stage.allowed_origins = origins;
        self
    }

    /// Sets the allowed HTTP methods, in the order they are advertised.
    #[must_use]
    pub fn allow_methods<I>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = Method>,
    {
        self.stage.allowed_methods = methods.into_iter().collect();
        self
    }

    /// Sets the allowed request headers.
    ///
    /// Leaving this empty reflects whatever the preflight asks for.
    #[must_use]
    pub fn allow_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stage.allowed_headers = headers.into_iter().map(|h| h.into().to_lowercase()).collect();
        self
    }

    /// Sets headers that should be exposed to JavaScript.
    #[must_use]
    pub fn expose_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stage.expose_headers = headers.into_iter().map(|h| h.into().to_lowercase()).collect();
        self
    }

    /// Sets whether to allow credentials (cookies, authorization headers).
    ///
    /// With any-origin policy the request origin is echoed instead of `*`.
    #[must_use]
    pub fn allow_credentials(mut self, allow: bool) -> Self {
        self.stage.allow_credentials = allow;
        self
    }

    /// Sets the max age for preflight cache.
    #[must_use]
    pub fn max_age(mut self, duration: Duration) -> Self {
        self.stage.max_age = Some(duration);
        self
    }

    /// Builds the stage.
    #[must_use]
    pub fn build(self) -> CorsStage {
        self.stage
    }
}

impl CorsStage {
    /// Creates a new CORS builder.
    #[must_use]
    pub fn builder() -> CorsBuilder {
        CorsBuilder::new()
    }

    /// Returns the origin policy.
    #[must_use]
    pub fn allowed_origins(&self) -> &AllowedOrigins {
        &self.allowed_origins
    }

    /// Writes the origin-related headers shared by preflight and regular
    /// responses.
    fn apply_origin(&self, origin: Option<&HeaderValue>, headers: &mut HeaderMap) {
        match &self.allowed_origins {
            AllowedOrigins::Any if !self.allow_credentials => {
                headers.insert(headers::ALLOW_ORIGIN, HeaderValue::from_static("*"));
            }
            AllowedOrigins::Any => {
                append_vary(headers, "Origin");
                if let Some(origin) = origin {
                    headers.insert(headers::ALLOW_ORIGIN, origin.clone());
                }
            }
            AllowedOrigins::List(_) => {
                append_vary(headers, "Origin");
                let allowed = origin
                    .filter(|o| o.to_str().is_ok_and(|o| self.allowed_origins.is_allowed(o)));
                if let Some(origin) = allowed {
                    headers.insert(headers::ALLOW_ORIGIN, origin.clone());
                }
            }
        }

        if self.allow_credentials {
            headers.insert(headers::ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        }
    }

    /// Builds the `204` answer to a preflight request.
    fn preflight_response(&self, request: &Request) -> Response {
        let mut response = Response::empty(StatusCode::NO_CONTENT);
        let headers = response.headers_mut();

        self.apply_origin(request.headers().get(headers::ORIGIN), headers);

        let methods = self
            .allowed_methods
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(",");
        if let Ok(value) = HeaderValue::from_str(&methods) {
            headers.insert(headers::ALLOW_METHODS, value);
        }

        if self.allowed_headers.is_empty() {
            append_vary(headers, "Access-Control-Request-Headers");
            if let Some(requested) = request.headers().get(headers::REQUEST_HEADERS) {
                headers.insert(headers::ALLOW_HEADERS, requested.clone());
            }
        } else if let Ok(value) = HeaderValue::from_str(&self.allowed_headers.join(",")) {
            headers.insert(headers::ALLOW_HEADERS, value);
        }

        if let Some(max_age) = self.max_age {
            headers.insert(headers::MAX_AGE, HeaderValue::from(max_age.as_secs()));
        }

        response
    }
}

/// Returns true if the request is a CORS preflight.
///
/// Every `OPTIONS` request is treated as one.
pub fn is_preflight(request: &Request) -> bool {
    request.method() == Method::OPTIONS
}

fn append_vary(headers: &mut HeaderMap, value: &'static str) {
    let already = headers
        .get_all(headers::VARY)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|v| v.trim().eq_ignore_ascii_case(value));
    if !already {
        headers.append(headers::VARY, HeaderValue::from_static(value));
    }
}

impl Stage for CorsStage {
    fn name(&self) -> &'static str {
        "cors"
    }

    fn phase(&self) -> Phase {
        Phase::Cors
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: &'a mut Request,
    ) -> BoxFuture<'a, StageOutcome> {
        Box::pin(async move {
            if is_preflight(request) {
                tracing::debug!(path = ctx.path(), "answering preflight");
                return StageOutcome::Respond(self.preflight_response(request));
            }

            ctx.set_extension(RequestOrigin(request.headers().get(headers::ORIGIN).cloned()));
            StageOutcome::Continue
        })
    }

    fn finalize<'a>(&'a self, ctx: &'a RequestContext, mut response: Response) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            if let Some(RequestOrigin(origin)) = ctx.get_extension::<RequestOrigin>() {
                let headers = response.headers_mut();
                self.apply_origin(origin.as_ref(), headers);

                if !self.expose_headers.is_empty() {
                    if let Ok(value) = HeaderValue::from_str(&self.expose_headers.join(",")) {
                        headers.insert(headers::EXPOSE_HEADERS, value);
                    }
                }
            }
            response
        })
    }
}
