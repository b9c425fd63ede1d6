//! Common types used throughout the request pipeline.

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use serde::Serialize;

/// The HTTP request type used in the pipeline.
///
/// This is a standard `http::Request` with a `Full<Bytes>` body.
pub type Request = http::Request<Full<Bytes>>;

/// The HTTP response type used in the pipeline.
///
/// This is a standard `http::Response` with a `Full<Bytes>` body.
pub type Response = http::Response<Full<Bytes>>;

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Serialized when a body cannot be encoded at all.
const FALLBACK_BODY: &[u8] = br#"{"status":"error","message":"Something went very wrong!"}"#;

/// Extension trait for building pipeline responses.
pub trait ResponseExt {
    /// Creates a JSON response with the given status code.
    fn json<T: Serialize>(status: StatusCode, value: &T) -> Response;

    /// Creates an empty response with the given status code.
    ///
    /// `Content-Length: 0` is set except on 1xx and 204, which must not
    /// carry it.
    fn empty(status: StatusCode) -> Response;
}

impl ResponseExt for Response {
    fn json<T: Serialize>(status: StatusCode, value: &T) -> Response {
        let body = serde_json::to_vec(value).unwrap_or_else(|e| {
            tracing::error!(error = %e, "response body serialization failed");
            FALLBACK_BODY.to_vec()
        });

        let mut response = http::Response::new(Full::new(Bytes::from(body)));
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        response
    }

    fn empty(status: StatusCode) -> Response {
        let mut response = http::Response::new(Full::new(Bytes::new()));
        *response.status_mut() = status;
        if !status.is_informational() && status != StatusCode::NO_CONTENT {
            response
                .headers_mut()
                .insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
        }
        response
    }
}

/// Drains a `Full<Bytes>` body.
///
/// `Full` yields its single frame immediately and cannot fail.
pub(crate) async fn collect_body(body: Full<Bytes>) -> Bytes {
    match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(never) => match never {},
    }
}
