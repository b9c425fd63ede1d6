//! Query and body parsing stage.
//!
//! Parses the query string into a JSON object and, for JSON content types,
//! the body into a JSON value. Bodies over the size ceiling are refused with
//! `413` before anything is parsed: first on the declared `Content-Length`,
//! then on the bytes actually received.

use crate::context::RequestContext;
use crate::middleware::{BoxFuture, Stage, StageOutcome};
use crate::pipeline::Phase;
use crate::query::parse_query;
use crate::types::{collect_body, Request};
use http::{header, HeaderMap, StatusCode};
use http_body_util::Full;
use trailhead_core::AppError;
use trailhead_telemetry::metrics::record_payload_rejected;

/// Default body ceiling: 10 KiB.
pub const DEFAULT_LIMIT: usize = 10 * 1024;

/// The body parse stage.
#[derive(Debug, Clone, Copy)]
pub struct BodyParser {
    limit: usize,
}

impl Default for BodyParser {
    fn default() -> Self {
        Self::new(DEFAULT_LIMIT)
    }
}

impl BodyParser {
    /// Creates a parser with the given byte ceiling.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }

    /// The byte ceiling.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    #[track_caller]
    fn too_large(&self, reason: &str) -> AppError {
        record_payload_rejected(reason);
        AppError::payload_too_large(format!(
            "Request entity too large! The limit is {} bytes.",
            self.limit
        ))
    }
}

/// Whether the request declares a JSON body (`application/json` or `*/*+json`).
pub fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .is_some_and(|v| v == "application/json" || (v.contains('/') && v.ends_with("+json")))
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

impl Stage for BodyParser {
    fn name(&self) -> &'static str {
        "body_parse"
    }

    fn phase(&self) -> Phase {
        Phase::BodyParse
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: &'a mut Request,
    ) -> BoxFuture<'a, StageOutcome> {
        Box::pin(async move {
            if let Some(declared) = declared_length(request.headers()) {
                if usize::try_from(declared).map_or(true, |n| n > self.limit) {
                    tracing::debug!(declared, limit = self.limit, "declared body over limit");
                    return StageOutcome::Fail(self.too_large("declared_length"));
                }
            }

            let bytes = collect_body(std::mem::take(request.body_mut())).await;
            if bytes.len() > self.limit {
                tracing::debug!(received = bytes.len(), limit = self.limit, "received body over limit");
                return StageOutcome::Fail(self.too_large("received_length"));
            }
            *request.body_mut() = Full::new(bytes.clone());

            ctx.set_query(parse_query(ctx.raw_query().unwrap_or_default()));

            if !bytes.is_empty() && is_json(request.headers()) {
                match serde_json::from_slice(&bytes) {
                    Ok(value) => ctx.set_body(Some(value)),
                    Err(e) => {
                        record_payload_rejected("malformed_json");
                        return StageOutcome::Fail(AppError::new(
                            format!("Invalid JSON in request body: {e}"),
                            StatusCode::BAD_REQUEST,
                        ));
                    }
                }
            }
            ctx.set_raw_body(bytes);
            StageOutcome::Continue
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::Method;
    use serde_json::json;

    fn request(uri: &str, content_type: Option<&str>, body: impl Into<Bytes>) -> Request {
        let mut builder = http::Request::builder().method(Method::POST).uri(uri);
        if let Some(ct) = content_type {
            builder = builder.header(header::CONTENT_TYPE, ct);
        }
        builder.body(Full::new(body.into())).unwrap()
    }

    async fn run(parser: BodyParser, mut request: Request) -> (RequestContext, StageOutcome, Request) {
        let mut ctx = RequestContext::new(request.method().clone(), request.uri().clone());
        let outcome = parser.process(&mut ctx, &mut request).await;
        (ctx, outcome, request)
    }

    #[tokio::test]
    async fn test_parses_json_and_query() {
        let req = request(
            "/api/v1/tours?price[lt]=500",
            Some("application/json; charset=utf-8"),
            r#"{"name":"The Sea Explorer","duration":7}"#,
        );
        let (ctx, outcome, req) = run(BodyParser::default(), req).await;
        assert!(outcome.is_continue());
        assert_eq!(ctx.body(), Some(&json!({"name": "The Sea Explorer", "duration": 7})));
        assert_eq!(ctx.query(), &json!({"price": {"lt": "500"}}));
        assert_eq!(collect_body(req.into_body()).await.len(), ctx.raw_body().len());
    }

    #[tokio::test]
    async fn test_empty_body_is_absent() {
        let (ctx, outcome, _) = run(BodyParser::default(), request("/", Some("application/json"), "")).await;
        assert!(outcome.is_continue());
        assert!(ctx.body().is_none());
    }

    #[tokio::test]
    async fn test_non_json_body_not_parsed() {
        let req = request("/", Some("text/plain"), "{not json}");
        let (ctx, outcome, _) = run(BodyParser::default(), req).await;
        assert!(outcome.is_continue());
        assert!(ctx.body().is_none());
        assert_eq!(&ctx.raw_body()[..], b"{not json}");
    }

    #[tokio::test]
    async fn test_malformed_json_is_operational_400() {
        let req = request("/", Some("application/json"), "{\"name\":");
        let (_, outcome, _) = run(BodyParser::default(), req).await;
        let StageOutcome::Fail(error) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
        assert!(error.is_operational());
    }

    #[tokio::test]
    async fn test_received_bytes_over_limit() {
        let req = request("/", Some("application/json"), vec![b' '; 11]);
        let (_, outcome, _) = run(BodyParser::new(10), req).await;
        let StageOutcome::Fail(error) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(error.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(error.is_operational());
    }

    #[tokio::test]
    async fn test_declared_length_over_limit() {
        let mut req = request("/", Some("application/json"), "{}");
        req.headers_mut()
            .insert(header::CONTENT_LENGTH, http::HeaderValue::from_static("20000"));
        let (ctx, outcome, _) = run(BodyParser::default(), req).await;
        assert!(matches!(outcome, StageOutcome::Fail(e) if e.status_code() == StatusCode::PAYLOAD_TOO_LARGE));
        assert!(ctx.raw_body().is_empty());
    }

    #[tokio::test]
    async fn test_exactly_at_limit_accepted() {
        let body = format!("\"{}\"", "a".repeat(8));
        let req = request("/", Some("application/json"), body);
        let (ctx, outcome, _) = run(BodyParser::new(10), req).await;
        assert!(outcome.is_continue());
        assert_eq!(ctx.body(), Some(&json!("aaaaaaaa")));
    }

    #[test]
    fn test_is_json() {
        let mut headers = HeaderMap::new();
        assert!(!is_json(&headers));
        headers.insert(header::CONTENT_TYPE, "application/vnd.api+json".parse().unwrap());
        assert!(is_json(&headers));
        headers.insert(header::CONTENT_TYPE, "Application/JSON".parse().unwrap());
        assert!(is_json(&headers));
        headers.insert(header::CONTENT_TYPE, "application/x-www-form-urlencoded".parse().unwrap());
        assert!(!is_json(&headers));
    }
}
