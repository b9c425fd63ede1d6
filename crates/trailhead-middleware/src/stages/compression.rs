//! Response compression stage.
//!
//! Negotiates an encoding from `Accept-Encoding` before dispatch and
//! compresses eligible bodies in its finalizer, so router responses and
//! error responses alike are covered.
//!
//! A body is compressed when:
//!
//! - an encoding was negotiated (`br`, `gzip` or `deflate`)
//! - the response has no `Content-Encoding` yet
//! - `Cache-Control` does not contain `no-transform`
//! - the content type is textual (`text/*`, JSON, JavaScript, XML, SVG)
//! - the body is at least `min_size` bytes
//! - the compressed form is actually smaller

use crate::context::RequestContext;
use crate::middleware::{BoxFuture, Stage, StageOutcome};
use crate::pipeline::Phase;
use crate::types::{collect_body, Request, Response};
use bytes::Bytes;
use flate2::write::{DeflateEncoder, GzEncoder};
use flate2::Compression;
use http::{header, HeaderMap, HeaderValue};
use http_body_util::Full;
use std::io::Write;

/// Compression algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// Brotli compression (RFC 7932).
    Brotli,
    /// Gzip compression (RFC 1952).
    Gzip,
    /// Deflate compression (RFC 1951).
    Deflate,
}

impl Algorithm {
    /// Server preference order used to break quality ties.
    pub const PREFERENCE: [Algorithm; 3] = [Self::Brotli, Self::Gzip, Self::Deflate];

    /// Returns the HTTP content-encoding value for this algorithm.
    #[must_use]
    pub fn encoding_name(&self) -> &'static str {
        match self {
            Self::Brotli => "br",
            Self::Gzip => "gzip",
            Self::Deflate => "deflate",
        }
    }

    /// Parses an algorithm from its HTTP encoding name.
    #[must_use]
    pub fn from_encoding(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "br" => Some(Self::Brotli),
            "gzip" | "x-gzip" => Some(Self::Gzip),
            "deflate" => Some(Self::Deflate),
            _ => None,
        }
    }
}

/// Error raised by an encoder.
#[derive(Debug, thiserror::Error)]
#[error("{algorithm:?} encoding failed: {source}")]
pub struct CompressionError {
    algorithm: Algorithm,
    #[source]
    source: std::io::Error,
}

/// Encoding chosen for the current request.
#[derive(Debug, Clone, Copy)]
struct Negotiated(Algorithm);

/// Parses `Accept-Encoding` into `(coding, quality)` pairs, keeping `*`.
fn parse_accept_encoding(value: &str) -> Vec<(String, f32)> {
    value
        .split(',')
        .filter_map(|part| {
            let mut pieces = part.split(';');
            let coding = pieces.next()?.trim().to_ascii_lowercase();
            if coding.is_empty() {
                return None;
            }
            let quality = pieces
                .filter_map(|p| p.trim().strip_prefix("q="))
                .find_map(|q| q.trim().parse::<f32>().ok())
                .map_or(1.0, |q| q.clamp(0.0, 1.0));
            Some((coding, quality))
        })
        .collect()
}

/// Picks the best supported algorithm for an `Accept-Encoding` value.
///
/// Highest quality wins; equal qualities fall back to
/// [`Algorithm::PREFERENCE`]. `q=0` excludes a coding, `*` stands in for any
/// coding not listed explicitly.
#[must_use]
pub fn negotiate(accept_encoding: &str) -> Option<Algorithm> {
    let offered = parse_accept_encoding(accept_encoding);
    let wildcard = offered.iter().find(|(c, _)| c == "*").map(|(_, q)| *q);

    let mut best: Option<(Algorithm, f32)> = None;
    for algorithm in Algorithm::PREFERENCE {
        let quality = offered
            .iter()
            .find(|(c, _)| Algorithm::from_encoding(c) == Some(algorithm))
            .map(|(_, q)| *q)
            .or(wildcard)
            .unwrap_or(0.0);
        if quality > 0.0 && best.map_or(true, |(_, q)| quality > q) {
            best = Some((algorithm, quality));
        }
    }
    best.map(|(algorithm, _)| algorithm)
}

/// Whether a content type is worth compressing.
#[must_use]
pub fn is_compressible(content_type: &str) -> bool {
    let base = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    base.starts_with("text/")
        || base.ends_with("+json")
        || base.ends_with("+xml")
        || matches!(
            base.as_str(),
            "application/json"
                | "application/javascript"
                | "application/xml"
                | "image/svg+xml"
        )
}

fn forbids_transform(headers: &HeaderMap) -> bool {
    headers
        .get(header::CACHE_CONTROL)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().contains("no-transform"))
}

/// The compression stage.
#[derive(Debug, Clone)]
pub struct CompressionStage {
    min_size: usize,
    level: u32,
}

impl Default for CompressionStage {
    fn default() -> Self {
        Self {
            min_size: 1024,
            level: 6,
        }
    }
}

impl CompressionStage {
    /// Creates a stage with the given threshold and level (0-9).
    #[must_use]
    pub fn new(min_size: usize, level: u32) -> Self {
        Self {
            min_size,
            level: level.min(9),
        }
    }

    /// Compresses `data` with `algorithm`.
    pub fn compress(&self, data: &[u8], algorithm: Algorithm) -> Result<Vec<u8>, CompressionError> {
        let wrap = |source| CompressionError { algorithm, source };
        match algorithm {
            Algorithm::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::new(self.level));
                encoder.write_all(data).map_err(wrap)?;
                encoder.finish().map_err(wrap)
            }
            Algorithm::Deflate => {
                let mut encoder = DeflateEncoder::new(Vec::new(), Compression::new(self.level));
                encoder.write_all(data).map_err(wrap)?;
                encoder.finish().map_err(wrap)
            }
            Algorithm::Brotli => {
                let mut output = Vec::new();
                let params = brotli::enc::BrotliEncoderParams {
                    quality: i32::try_from(self.level).unwrap_or(9),
                    ..Default::default()
                };
                brotli::BrotliCompress(&mut std::io::Cursor::new(data), &mut output, &params)
                    .map_err(wrap)?;
                Ok(output)
            }
        }
    }
}

fn append_vary(headers: &mut HeaderMap) {
    let present = headers
        .get_all(header::VARY)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|v| v.trim().eq_ignore_ascii_case("accept-encoding"));
    if !present {
        headers.append(header::VARY, HeaderValue::from_static("Accept-Encoding"));
    }
}

impl Stage for CompressionStage {
    fn name(&self) -> &'static str {
        "compression"
    }

    fn phase(&self) -> Phase {
        Phase::Compression
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: &'a mut Request,
    ) -> BoxFuture<'a, StageOutcome> {
        Box::pin(async move {
            if let Some(algorithm) = request
                .headers()
                .get(header::ACCEPT_ENCODING)
                .and_then(|v| v.to_str().ok())
                .and_then(negotiate)
            {
                ctx.set_extension(Negotiated(algorithm));
            }
            StageOutcome::Continue
        })
    }

    fn finalize<'a>(&'a self, ctx: &'a RequestContext, response: Response) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let compressible = response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .is_some_and(is_compressible);
            if !compressible || forbids_transform(response.headers()) {
                return response;
            }

            let (mut parts, body) = response.into_parts();
            append_vary(&mut parts.headers);

            let body = collect_body(body).await;
            let algorithm = match ctx.get_extension::<Negotiated>() {
                Some(Negotiated(algorithm))
                    if body.len() >= self.min_size
                        && !parts.headers.contains_key(header::CONTENT_ENCODING) =>
                {
                    *algorithm
                }
                _ => return Response::from_parts(parts, Full::new(body)),
            };

            match self.compress(&body, algorithm) {
                Ok(compressed) if compressed.len() < body.len() => {
                    parts.headers.insert(
                        header::CONTENT_ENCODING,
                        HeaderValue::from_static(algorithm.encoding_name()),
                    );
                    parts.headers.remove(header::CONTENT_LENGTH);
                    Response::from_parts(parts, Full::new(Bytes::from(compressed)))
                }
                Ok(_) => Response::from_parts(parts, Full::new(body)),
                Err(e) => {
                    tracing::warn!(error = %e, "compression failed, sending identity");
                    Response::from_parts(parts, Full::new(body))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResponseExt;
    use flate2::read::GzDecoder;
    use http::{Method, StatusCode};
    use std::io::Read;

    fn large_json() -> serde_json::Value {
        let tours: Vec<_> = (0..100)
            .map(|i| serde_json::json!({"name": format!("The Forest Hiker {i}"), "price": 397}))
            .collect();
        serde_json::json!({"status": "success", "data": tours})
    }

    async fn negotiated(accept: &str) -> RequestContext {
        let stage = CompressionStage::default();
        let mut ctx = RequestContext::new(Method::GET, "/api/v1/tours".parse().unwrap());
        let mut request = http::Request::builder()
            .header(header::ACCEPT_ENCODING, accept)
            .body(Full::new(Bytes::new()))
            .unwrap();
        assert!(stage.process(&mut ctx, &mut request).await.is_continue());
        ctx
    }

    #[test]
    fn test_negotiate_prefers_quality() {
        assert_eq!(negotiate("gzip, deflate"), Some(Algorithm::Gzip));
        assert_eq!(negotiate("gzip;q=0.5, br;q=0.9"), Some(Algorithm::Brotli));
        assert_eq!(negotiate("deflate, gzip;q=0.2"), Some(Algorithm::Deflate));
        assert_eq!(negotiate("br, gzip"), Some(Algorithm::Brotli));
    }

    #[test]
    fn test_negotiate_exclusions() {
        assert_eq!(negotiate("identity"), None);
        assert_eq!(negotiate("gzip;q=0"), None);
        assert_eq!(negotiate("*"), Some(Algorithm::Brotli));
        assert_eq!(negotiate("*, br;q=0"), Some(Algorithm::Gzip));
        assert_eq!(negotiate(""), None);
    }

    #[test]
    fn test_is_compressible() {
        assert!(is_compressible("application/json; charset=utf-8"));
        assert!(is_compressible("text/html"));
        assert!(is_compressible("application/problem+json"));
        assert!(!is_compressible("image/png"));
        assert!(!is_compressible("application/octet-stream"));
    }

    #[tokio::test]
    async fn test_gzip_round_trip() {
        let stage = CompressionStage::default();
        let ctx = negotiated("gzip").await;
        let response = Response::json(StatusCode::OK, &large_json());

        let response = stage.finalize(&ctx, response).await;
        assert_eq!(response.headers()[header::CONTENT_ENCODING], "gzip");
        assert_eq!(response.headers()[header::VARY], "Accept-Encoding");

        let compressed = collect_body(response.into_body()).await;
        let mut decoded = String::new();
        GzDecoder::new(&compressed[..]).read_to_string(&mut decoded).unwrap();
        let value: serde_json::Value = serde_json::from_str(&decoded).unwrap();
        assert_eq!(value, large_json());
    }

    #[tokio::test]
    async fn test_brotli_applied() {
        let stage = CompressionStage::default();
        let ctx = negotiated("br").await;
        let response = stage
            .finalize(&ctx, Response::json(StatusCode::OK, &large_json()))
            .await;
        assert_eq!(response.headers()[header::CONTENT_ENCODING], "br");
    }

    #[tokio::test]
    async fn test_small_body_left_alone() {
        let stage = CompressionStage::default();
        let ctx = negotiated("gzip").await;
        let response = stage
            .finalize(&ctx, Response::json(StatusCode::OK, &serde_json::json!({"ok": true})))
            .await;
        assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
        assert_eq!(response.headers()[header::VARY], "Accept-Encoding");
    }

    #[tokio::test]
    async fn test_no_transform_respected() {
        let stage = CompressionStage::default();
        let ctx = negotiated("gzip").await;
        let mut response = Response::json(StatusCode::OK, &large_json());
        response
            .headers_mut()
            .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-transform"));
        let response = stage.finalize(&ctx, response).await;
        assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
    }

    #[tokio::test]
    async fn test_without_negotiation() {
        let stage = CompressionStage::default();
        let ctx = RequestContext::new(Method::GET, "/".parse().unwrap());
        let response = stage
            .finalize(&ctx, Response::json(StatusCode::OK, &large_json()))
            .await;
        assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
    }
}
