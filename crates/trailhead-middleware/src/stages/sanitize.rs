//! Sanitizer stage.
//!
//! Cleans the parsed query and body, and the request headers, after
//! parsing and before any router sees them:
//!
//! - **Operator injection**: object keys starting with `$` or containing `.`
//!   are removed at any depth; so are header names of that shape.
//! - **Markup injection**: every `<` in a string leaf becomes `&lt;`.
//! - **Parameter pollution**: a top-level query key holding an array that is
//!   not whitelisted collapses to its last element.
//!
//! A sanitized JSON body is re-serialized into both the request body and
//! the context's raw bytes, so routers never see the original payload.
//!
//! Each step is idempotent, so sanitizing clean output changes nothing.

use crate::context::RequestContext;
use crate::middleware::{BoxFuture, Stage, StageOutcome};
use crate::pipeline::Phase;
use crate::types::Request;
use bytes::Bytes;
use http::{header, HeaderName, HeaderValue};
use http_body_util::Full;
use serde_json::Value;
use std::collections::HashSet;
use trailhead_core::AppError;

/// Query keys allowed to repeat by default.
pub const DEFAULT_WHITELIST: [&str; 6] = [
    "duration",
    "ratingsQuantity",
    "ratingsAverage",
    "maxGroupSize",
    "difficulty",
    "price",
];

/// Whether a key could smuggle a query operator or a nested path.
pub fn is_operator_key(key: &str) -> bool {
    key.starts_with('$') || key.contains('.')
}

/// Removes operator keys at every depth. Returns how many were dropped.
pub fn strip_operators(value: &mut Value) -> usize {
    match value {
        Value::Object(map) => {
            let before = map.len();
            map.retain(|key, _| !is_operator_key(key));
            let mut removed = before - map.len();
            for child in map.values_mut() {
                removed += strip_operators(child);
            }
            removed
        }
        Value::Array(items) => items.iter_mut().map(strip_operators).sum(),
        _ => 0,
    }
}

/// Replaces `<` with `&lt;` in every string leaf.
pub fn escape_markup(value: &mut Value) {
    match value {
        Value::String(s) if s.contains('<') => *s = s.replace('<', "&lt;"),
        Value::Object(map) => map.values_mut().for_each(escape_markup),
        Value::Array(items) => items.iter_mut().for_each(escape_markup),
        _ => {}
    }
}

/// Collapses repeated top-level query keys outside `whitelist` to their
/// last value. Nested arrays collapse all the way down.
pub fn collapse_pollution(query: &mut Value, whitelist: &HashSet<String>) {
    let Value::Object(map) = query else {
        return;
    };
    for (key, value) in map.iter_mut() {
        if whitelist.contains(key) || !value.is_array() {
            continue;
        }
        let mut current = value.take();
        while let Value::Array(mut items) = current {
            current = items.pop().unwrap_or(Value::Null);
        }
        *value = current;
    }
}

/// The sanitizer stage.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    strip_operators: bool,
    escape_markup: bool,
    collapse_pollution: bool,
    whitelist: HashSet<String>,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self {
            strip_operators: true,
            escape_markup: true,
            collapse_pollution: true,
            whitelist: DEFAULT_WHITELIST.iter().map(ToString::to_string).collect(),
        }
    }
}

impl Sanitizer {
    /// Creates a sanitizer with every step enabled and the default whitelist.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle operator-key removal.
    #[must_use]
    pub fn strip_operators(mut self, enabled: bool) -> Self {
        self.strip_operators = enabled;
        self
    }

    /// Toggle markup escaping.
    #[must_use]
    pub fn escape_markup(mut self, enabled: bool) -> Self {
        self.escape_markup = enabled;
        self
    }

    /// Toggle parameter-pollution collapse.
    #[must_use]
    pub fn collapse_pollution(mut self, enabled: bool) -> Self {
        self.collapse_pollution = enabled;
        self
    }

    /// Replaces the pollution whitelist.
    #[must_use]
    pub fn whitelist<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.whitelist = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Sanitizes a query object in place.
    pub fn sanitize_query(&self, query: &mut Value) {
        if self.strip_operators {
            strip_operators(query);
        }
        if self.escape_markup {
            escape_markup(query);
        }
        if self.collapse_pollution {
            collapse_pollution(query, &self.whitelist);
        }
    }

    /// Sanitizes a body value in place.
    pub fn sanitize_body(&self, body: &mut Value) {
        if self.strip_operators {
            strip_operators(body);
        }
        if self.escape_markup {
            escape_markup(body);
        }
    }
}

impl Stage for Sanitizer {
    fn name(&self) -> &'static str {
        "sanitize"
    }

    fn phase(&self) -> Phase {
        Phase::Sanitize
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: &'a mut Request,
    ) -> BoxFuture<'a, StageOutcome> {
        self.sanitize_query(ctx.query_mut());
        if let Some(body) = ctx.body_mut() {
            self.sanitize_body(body);
        }
        if let Err(outcome) = replace_raw_body(ctx, request) {
            return Box::pin(std::future::ready(outcome));
        }

        if self.strip_operators {
            let smuggled: Vec<HeaderName> = request
                .headers()
                .keys()
                .filter(|name| is_operator_key(name.as_str()))
                .cloned()
                .collect();
            for name in smuggled {
                tracing::debug!(header = %name, "dropping operator header");
                request.headers_mut().remove(name);
            }
        }

        Box::pin(std::future::ready(StageOutcome::Continue))
    }
}

fn replace_raw_body(ctx: &mut RequestContext, request: &mut Request) -> Result<(), StageOutcome> {
    let Some(body) = ctx.body() else {
        return Ok(());
    };
    let bytes = match serde_json::to_vec(body) {
        Ok(encoded) => Bytes::from(encoded),
        Err(e) => {
            return Err(StageOutcome::Fail(AppError::internal(format!(
                "failed to re-encode sanitized body: {e}"
            ))));
        }
    };
    if request.headers().contains_key(header::CONTENT_LENGTH) {
        request
            .headers_mut()
            .insert(header::CONTENT_LENGTH, HeaderValue::from(bytes.len()));
    }
    *request.body_mut() = Full::new(bytes.clone());
    ctx.set_raw_body(bytes);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::collect_body;
    use http::Method;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_strip_operators_nested() {
        let mut value = json!({
            "email": {"$gt": ""},
            "password": "pass1234",
            "profile.admin": true,
            "nested": [{"$where": "sleep(100)", "ok": 1}]
        });
        assert_eq!(strip_operators(&mut value), 3);
        assert_eq!(
            value,
            json!({"email": {}, "password": "pass1234", "nested": [{"ok": 1}]})
        );
    }

    #[test]
    fn test_escape_markup() {
        let mut value = json!({"name": "<script>alert('x')</script>", "tags": ["<b>", 3]});
        escape_markup(&mut value);
        assert_eq!(
            value,
            json!({"name": "&lt;script>alert('x')&lt;/script>", "tags": ["&lt;b>", 3]})
        );
    }

    #[test]
    fn test_collapse_pollution() {
        let mut query = json!({
            "sort": ["duration", "price"],
            "duration": ["5", "9"],
            "page": "2"
        });
        let sanitizer = Sanitizer::new();
        sanitizer.sanitize_query(&mut query);
        assert_eq!(
            query,
            json!({"sort": "price", "duration": ["5", "9"], "page": "2"})
        );
    }

    #[test]
    fn test_custom_whitelist() {
        let mut query = json!({"sort": ["a", "b"], "duration": ["5", "9"]});
        Sanitizer::new().whitelist(["sort"]).sanitize_query(&mut query);
        assert_eq!(query, json!({"sort": ["a", "b"], "duration": "9"}));
    }

    #[test]
    fn test_steps_can_be_disabled() {
        let mut body = json!({"$set": "<i>"});
        Sanitizer::new()
            .strip_operators(false)
            .escape_markup(false)
            .sanitize_body(&mut body);
        assert_eq!(body, json!({"$set": "<i>"}));
    }

    #[tokio::test]
    async fn test_stage_cleans_context_and_headers() {
        let mut ctx = RequestContext::new(Method::POST, "/api/v1/users/login".parse().unwrap());
        ctx.set_query(json!({"role": {"$ne": "user"}}));
        ctx.set_body(Some(json!({"email": {"$gt": ""}, "name": "<img>"})));
        let mut request = http::Request::builder()
            .header("$where", "1")
            .header("x.forwarded", "2")
            .header("accept", "application/json")
            .body(Full::new(Bytes::new()))
            .unwrap();

        let outcome = Sanitizer::new().process(&mut ctx, &mut request).await;
        assert!(outcome.is_continue());
        assert_eq!(ctx.query(), &json!({"role": {}}));
        assert_eq!(ctx.body(), Some(&json!({"email": {}, "name": "&lt;img>"})));
        assert_eq!(request.headers().len(), 1);
        assert!(request.headers().contains_key("accept"));
    }

    #[tokio::test]
    async fn test_stage_rewrites_request_body() {
        let raw = r#"{"email":{"$gt":""},"name":"<script>x</script>"}"#;
        let mut ctx = RequestContext::new(Method::POST, "/api/v1/users/login".parse().unwrap());
        ctx.set_body(Some(serde_json::from_str(raw).unwrap()));
        ctx.set_raw_body(Bytes::from(raw));
        let mut request = http::Request::builder()
            .method(Method::POST)
            .header(header::CONTENT_LENGTH, raw.len())
            .body(Full::new(Bytes::from(raw)))
            .unwrap();

        let outcome = Sanitizer::new().process(&mut ctx, &mut request).await;
        assert!(outcome.is_continue());

        let expected = json!({"email": {}, "name": "&lt;script>x&lt;/script>"});
        let from_ctx: Value = serde_json::from_slice(ctx.raw_body()).unwrap();
        assert_eq!(from_ctx, expected);

        let declared = request.headers()[header::CONTENT_LENGTH].to_str().unwrap().to_string();
        let bytes = collect_body(request.into_body()).await;
        assert_eq!(declared, bytes.len().to_string());
        let from_request: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(from_request, expected);
    }

    #[tokio::test]
    async fn test_stage_leaves_non_json_body_alone() {
        let mut ctx = RequestContext::new(Method::POST, "/upload".parse().unwrap());
        ctx.set_raw_body(Bytes::from_static(b"plain <text>"));
        let mut request = http::Request::builder()
            .method(Method::POST)
            .body(Full::new(Bytes::from_static(b"plain <text>")))
            .unwrap();

        Sanitizer::new().process(&mut ctx, &mut request).await;
        assert_eq!(&ctx.raw_body()[..], b"plain <text>");
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        let key = prop_oneof![
            "[a-z]{1,6}",
            "\\$[a-z]{1,4}",
            "[a-z]{1,3}\\.[a-z]{1,3}",
            Just("price".to_string()),
            Just("sort".to_string()),
        ];
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            "[a-z<>&;/ ]{0,12}".prop_map(Value::String),
        ];
        leaf.prop_recursive(4, 48, 6, move |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..5).prop_map(Value::Array),
                prop::collection::btree_map(key.clone(), inner, 0..5)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    fn has_unsafe_content(value: &Value) -> bool {
        match value {
            Value::String(s) => s.contains('<'),
            Value::Array(items) => items.iter().any(has_unsafe_content),
            Value::Object(map) => map
                .iter()
                .any(|(k, v)| is_operator_key(k) || has_unsafe_content(v)),
            _ => false,
        }
    }

    proptest! {
        #[test]
        fn prop_sanitize_is_idempotent(value in arb_json()) {
            let sanitizer = Sanitizer::new();

            let mut once = json!({"q": value.clone()});
            sanitizer.sanitize_query(&mut once);
            let mut twice = once.clone();
            sanitizer.sanitize_query(&mut twice);
            prop_assert_eq!(&once, &twice);

            let mut body_once = value;
            sanitizer.sanitize_body(&mut body_once);
            let mut body_twice = body_once.clone();
            sanitizer.sanitize_body(&mut body_twice);
            prop_assert_eq!(&body_once, &body_twice);
        }

        #[test]
        fn prop_sanitized_output_is_clean(value in arb_json()) {
            let mut body = value;
            Sanitizer::new().sanitize_body(&mut body);
            prop_assert!(!has_unsafe_content(&body));
        }
    }
}
