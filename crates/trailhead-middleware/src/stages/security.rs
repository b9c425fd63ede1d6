//! Protective response headers.
//!
//! Attaches a fixed header set to every response and strips
//! `X-Powered-By`. Headers a router already set are left untouched.

use crate::context::RequestContext;
use crate::middleware::{BoxFuture, Stage, StageOutcome};
use crate::pipeline::{Phase, PipelineError};
use crate::types::{Request, Response};
use http::header::{HeaderName, HeaderValue};

/// Header identifying the server stack, always removed when asked to.
pub const POWERED_BY: &str = "x-powered-by";

/// The standard protective header set.
pub const STANDARD_HEADERS: [(&str, &str); 12] = [
    (
        "content-security-policy",
        "default-src 'self';base-uri 'self';font-src 'self' https: data:;form-action 'self';\
         frame-ancestors 'self';img-src 'self' data:;object-src 'none';script-src 'self';\
         script-src-attr 'none';style-src 'self' https: 'unsafe-inline';upgrade-insecure-requests",
    ),
    ("cross-origin-opener-policy", "same-origin"),
    ("cross-origin-resource-policy", "same-origin"),
    ("origin-agent-cluster", "?1"),
    ("referrer-policy", "no-referrer"),
    ("strict-transport-security", "max-age=15552000; includeSubDomains"),
    ("x-content-type-options", "nosniff"),
    ("x-dns-prefetch-control", "off"),
    ("x-download-options", "noopen"),
    ("x-frame-options", "SAMEORIGIN"),
    ("x-permitted-cross-domain-policies", "none"),
    ("x-xss-protection", "0"),
];

/// The security headers stage.
#[derive(Debug, Clone)]
pub struct SecurityHeaders {
    headers: Vec<(HeaderName, HeaderValue)>,
    remove_powered_by: bool,
}

impl Default for SecurityHeaders {
    fn default() -> Self {
        Self {
            headers: STANDARD_HEADERS
                .iter()
                .map(|&(name, value)| {
                    (HeaderName::from_static(name), HeaderValue::from_static(value))
                })
                .collect(),
            remove_powered_by: true,
        }
    }
}

impl SecurityHeaders {
    /// The standard set with `overrides` applied on top.
    ///
    /// An override with an empty value removes that header from the set.
    ///
    /// # Example
    ///
    /// ```
    /// use trailhead_middleware::stages::security::SecurityHeaders;
    ///
    /// let stage = SecurityHeaders::with_overrides([
    ///     ("x-frame-options", "DENY"),
    ///     ("x-download-options", ""),
    /// ])
    /// .unwrap();
    /// assert_eq!(stage.header("x-frame-options"), Some("DENY"));
    /// assert_eq!(stage.header("x-download-options"), None);
    /// ```
    pub fn with_overrides<I, K, V>(overrides: I) -> Result<Self, PipelineError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut stage = Self::default();
        for (name, value) in overrides {
            let (name, value) = (name.as_ref(), value.as_ref());
            let header = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| PipelineError::invalid_header(name, e))?;

            stage.headers.retain(|(existing, _)| *existing != header);
            if !value.is_empty() {
                let value =
                    HeaderValue::from_str(value).map_err(|e| PipelineError::invalid_header(name, e))?;
                stage.headers.push((header, value));
            }
        }
        Ok(stage)
    }

    /// Keep or strip `X-Powered-By`.
    #[must_use]
    pub fn remove_powered_by(mut self, remove: bool) -> Self {
        self.remove_powered_by = remove;
        self
    }

    /// Looks up a configured header value.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.as_str().eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.to_str().ok())
    }

    /// Number of headers attached to each response.
    #[must_use]
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// Whether no headers are attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

impl Stage for SecurityHeaders {
    fn name(&self) -> &'static str {
        "security_headers"
    }

    fn phase(&self) -> Phase {
        Phase::SecurityHeaders
    }

    fn process<'a>(
        &'a self,
        _ctx: &'a mut RequestContext,
        _request: &'a mut Request,
    ) -> BoxFuture<'a, StageOutcome> {
        Box::pin(std::future::ready(StageOutcome::Continue))
    }

    fn finalize<'a>(&'a self, _ctx: &'a RequestContext, mut response: Response) -> BoxFuture<'a, Response> {
        let headers = response.headers_mut();
        for (name, value) in &self.headers {
            if !headers.contains_key(name) {
                headers.insert(name.clone(), value.clone());
            }
        }
        if self.remove_powered_by {
            headers.remove(POWERED_BY);
        }
        Box::pin(std::future::ready(response))
    }
}
