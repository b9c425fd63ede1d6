//! Request-scoped pipeline state.
//!
//! A [`RequestContext`] is created once per request by the pipeline driver
//! and handed mutably to every stage in order. Stages record what they
//! parsed or decided here, and stash typed values in the extension map for
//! their own response finalizers.

use crate::types::Request;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use http::{HeaderMap, Method, Uri};
use serde_json::{Map, Value};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use trailhead_core::RequestId;

/// Header carrying an upstream request ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Header a trusted proxy uses to report the original client address.
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Rate-limit key for requests whose client address cannot be resolved.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// State that flows through the pipeline for a single request.
///
/// # Example
///
/// ```
/// use trailhead_middleware::context::RequestContext;
/// use http::Method;
///
/// let ctx = RequestContext::new(Method::GET, "/api/v1/tours?sort=price".parse().unwrap());
/// assert_eq!(ctx.path(), "/api/v1/tours");
/// assert_eq!(ctx.original_url(), "/api/v1/tours?sort=price");
/// assert_eq!(ctx.client_key(), "unknown");
/// ```
#[derive(Debug)]
pub struct RequestContext {
    request_id: RequestId,
    client_addr: Option<IpAddr>,
    method: Method,
    uri: Uri,
    original_url: String,
    requested_at: DateTime<Utc>,
    started_at: Instant,
    query: Value,
    body: Option<Value>,
    raw_body: Bytes,
    handled: bool,
    extensions: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl RequestContext {
    /// Creates a context for the given method and URI with a fresh request ID.
    #[must_use]
    pub fn new(method: Method, uri: Uri) -> Self {
        let original_url = uri
            .path_and_query()
            .map_or_else(|| uri.path().to_string(), ToString::to_string);

        Self {
            request_id: RequestId::new(),
            client_addr: None,
            method,
            uri,
            original_url,
            requested_at: Utc::now(),
            started_at: Instant::now(),
            query: Value::Object(Map::new()),
            body: None,
            raw_body: Bytes::new(),
            handled: false,
            extensions: HashMap::new(),
        }
    }

    /// Creates the context for an inbound request.
    ///
    /// An `X-Request-Id` header carrying a valid UUID is propagated; anything
    /// else gets a fresh ID. With `trust_proxy`, the leftmost parsable
    /// `X-Forwarded-For` address wins over the socket peer.
    #[must_use]
    pub fn from_request(request: &Request, peer: Option<SocketAddr>, trust_proxy: bool) -> Self {
        let mut ctx = Self::new(request.method().clone(), request.uri().clone());

        if let Some(id) = request
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(RequestId::parse)
        {
            ctx.request_id = id;
        }

        ctx.client_addr = resolve_client(request.headers(), peer, trust_proxy);
        ctx
    }

    /// Returns the request ID.
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Returns the resolved client address, if any.
    #[must_use]
    pub fn client_addr(&self) -> Option<IpAddr> {
        self.client_addr
    }

    /// Sets the resolved client address.
    pub fn set_client_addr(&mut self, addr: Option<IpAddr>) {
        self.client_addr = addr;
    }

    /// Key used to attribute this request to a client.
    #[must_use]
    pub fn client_key(&self) -> String {
        self.client_addr
            .map_or_else(|| UNKNOWN_CLIENT.to_string(), |addr| addr.to_string())
    }

    /// Returns the HTTP method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request path without the query string.
    #[must_use]
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Returns the raw query string, if any.
    #[must_use]
    pub fn raw_query(&self) -> Option<&str> {
        self.uri.query()
    }

    /// Returns the URL as the client sent it (path and query).
    #[must_use]
    pub fn original_url(&self) -> &str {
        &self.original_url
    }

    /// Wall-clock time the request entered the pipeline.
    #[must_use]
    pub fn requested_at(&self) -> DateTime<Utc> {
        self.requested_at
    }

    /// [`requested_at`](Self::requested_at) as an RFC 3339 string.
    #[must_use]
    pub fn requested_at_rfc3339(&self) -> String {
        self.requested_at
            .to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Monotonic instant the request entered the pipeline.
    #[must_use]
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Time spent in the pipeline so far.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Parsed query parameters, always a JSON object.
    #[must_use]
    pub fn query(&self) -> &Value {
        &self.query
    }

    /// Mutable access to the parsed query.
    pub fn query_mut(&mut self) -> &mut Value {
        &mut self.query
    }

    /// Replaces the parsed query.
    pub fn set_query(&mut self, query: Value) {
        self.query = query;
    }

    /// Parsed JSON body, absent when the request had none.
    #[must_use]
    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    /// Mutable access to the parsed body.
    pub fn body_mut(&mut self) -> Option<&mut Value> {
        self.body.as_mut()
    }

    /// Replaces the parsed body.
    pub fn set_body(&mut self, body: Option<Value>) {
        self.body = body;
    }

    /// The body bytes. After sanitization a JSON body holds the re-encoded
    /// sanitized value, not the bytes received.
    #[must_use]
    pub fn raw_body(&self) -> &Bytes {
        &self.raw_body
    }

    pub(crate) fn set_raw_body(&mut self, bytes: Bytes) {
        self.raw_body = bytes;
    }

    /// Whether a response has been claimed for this request.
    #[must_use]
    pub fn is_handled(&self) -> bool {
        self.handled
    }

    /// Claims the response slot.
    ///
    /// Returns `false` if it was already claimed.
    pub(crate) fn claim_response(&mut self) -> bool {
        !std::mem::replace(&mut self.handled, true)
    }

    /// Stores a typed extension value, replacing any previous one.
    ///
    /// # Example
    ///
    /// ```
    /// use trailhead_middleware::context::RequestContext;
    /// use http::Method;
    ///
    /// struct Negotiated(&'static str);
    ///
    /// let mut ctx = RequestContext::new(Method::GET, "/".parse().unwrap());
    /// ctx.set_extension(Negotiated("gzip"));
    /// assert_eq!(ctx.get_extension::<Negotiated>().unwrap().0, "gzip");
    /// ```
    pub fn set_extension<T: Send + Sync + 'static>(&mut self, value: T) {
        self.extensions.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Retrieves a typed extension value.
    #[must_use]
    pub fn get_extension<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref())
    }

    /// Removes and returns a typed extension value.
    pub fn remove_extension<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.extensions
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast().ok())
            .map(|b| *b)
    }

    /// Checks if an extension of the given type exists.
    #[must_use]
    pub fn has_extension<T: Send + Sync + 'static>(&self) -> bool {
        self.extensions.contains_key(&TypeId::of::<T>())
    }
}

fn resolve_client(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> Option<IpAddr> {
    if trust_proxy {
        let forwarded = headers
            .get(FORWARDED_FOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').find_map(|hop| hop.trim().parse::<IpAddr>().ok()));
        if forwarded.is_some() {
            return forwarded;
        }
    }
    peer.map(|addr| addr.ip())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http_body_util::Full;

    fn request_with(headers: &[(&str, &str)]) -> Request {
        let mut builder = http::Request::builder().uri("/api/v1/tours?page=2");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Full::new(Bytes::new())).unwrap()
    }

    #[test]
    fn test_new_context_defaults() {
        let ctx = RequestContext::new(Method::POST, "/x".parse().unwrap());
        assert_eq!(ctx.method(), Method::POST);
        assert_eq!(ctx.query(), &Value::Object(Map::new()));
        assert!(ctx.body().is_none());
        assert!(!ctx.is_handled());
        assert!(ctx.raw_query().is_none());
    }

    #[test]
    fn test_original_url_keeps_query() {
        let ctx = RequestContext::from_request(&request_with(&[]), None, false);
        assert_eq!(ctx.original_url(), "/api/v1/tours?page=2");
        assert_eq!(ctx.path(), "/api/v1/tours");
        assert_eq!(ctx.raw_query(), Some("page=2"));
    }

    #[test]
    fn test_request_id_propagated_when_valid() {
        let id = RequestId::new();
        let request = request_with(&[(REQUEST_ID_HEADER, &id.to_string())]);
        let ctx = RequestContext::from_request(&request, None, false);
        assert_eq!(ctx.request_id(), id);
    }

    #[test]
    fn test_request_id_replaced_when_invalid() {
        let request = request_with(&[(REQUEST_ID_HEADER, "not-a-uuid")]);
        let ctx = RequestContext::from_request(&request, None, false);
        assert_ne!(ctx.request_id().to_string(), "not-a-uuid");
    }

    #[test]
    fn test_client_from_peer() {
        let peer: SocketAddr = "10.0.0.7:5123".parse().unwrap();
        let request = request_with(&[(FORWARDED_FOR_HEADER, "203.0.113.9")]);
        let ctx = RequestContext::from_request(&request, Some(peer), false);
        assert_eq!(ctx.client_key(), "10.0.0.7");
    }

    #[test]
    fn test_client_from_forwarded_when_trusted() {
        let peer: SocketAddr = "10.0.0.7:5123".parse().unwrap();
        let request = request_with(&[(FORWARDED_FOR_HEADER, "garbage, 203.0.113.9, 10.0.0.1")]);
        let ctx = RequestContext::from_request(&request, Some(peer), true);
        assert_eq!(ctx.client_key(), "203.0.113.9");
    }

    #[test]
    fn test_unknown_client() {
        let ctx = RequestContext::from_request(&request_with(&[]), None, true);
        assert_eq!(ctx.client_key(), UNKNOWN_CLIENT);
    }

    #[test]
    fn test_claim_response_once() {
        let mut ctx = RequestContext::new(Method::GET, "/".parse().unwrap());
        assert!(ctx.claim_response());
        assert!(!ctx.claim_response());
        assert!(ctx.is_handled());
    }

    #[test]
    fn test_requested_at_is_rfc3339() {
        let ctx = RequestContext::new(Method::GET, "/".parse().unwrap());
        let stamp = ctx.requested_at_rfc3339();
        assert!(DateTime::parse_from_rfc3339(&stamp).is_ok());
        assert!(stamp.ends_with('Z'));
    }

    #[test]
    fn test_extensions() {
        #[derive(Debug, PartialEq)]
        struct Marker(u32);

        let mut ctx = RequestContext::new(Method::GET, "/".parse().unwrap());
        assert!(!ctx.has_extension::<Marker>());
        ctx.set_extension(Marker(7));
        assert_eq!(ctx.get_extension::<Marker>(), Some(&Marker(7)));
        assert_eq!(ctx.remove_extension::<Marker>(), Some(Marker(7)));
        assert!(!ctx.has_extension::<Marker>());
    }
}
