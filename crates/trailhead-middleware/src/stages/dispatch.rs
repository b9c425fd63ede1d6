//! Router dispatch stage.
//!
//! Resource routers are mounted at segment-aware path prefixes and tried in
//! mount order. The first router that claims the request answers it; an
//! unclaimed request continues to the fallback.
//!
//! # Example
//!
//! ```
//! use trailhead_middleware::stages::dispatch::{Dispatcher, FnRouter};
//! use trailhead_middleware::{Response, ResponseExt};
//! use http::{Method, StatusCode};
//!
//! let tours = FnRouter::new(|ctx, _request, sub_path| {
//!     let listing = ctx.method() == Method::GET && sub_path == "/";
//!     async move {
//!         Ok(listing.then(|| Response::json(StatusCode::OK, &serde_json::json!({"status": "success"}))))
//!     }
//! });
//!
//! let dispatcher = Dispatcher::new().mount("/api/v1/tours", tours).unwrap();
//! assert_eq!(dispatcher.prefixes(), vec!["/api/v1/tours"]);
//! ```

use crate::context::RequestContext;
use crate::middleware::{BoxFuture, Stage, StageOutcome};
use crate::pipeline::{Phase, PipelineError};
use crate::stages::matches_prefix;
use crate::types::{Request, Response};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use trailhead_core::AppError;

/// What a router reports for one request.
pub type RouteResult = Result<Option<Response>, AppError>;

/// A resource router.
///
/// Given the sanitized context, the request, and the path below the mount
/// prefix (always starting with `/`), returns:
///
/// - `Ok(Some(response))` to claim the request
/// - `Ok(None)` to pass it on
/// - `Err(error)` to fail it; defects use [`AppError::defect`]
pub trait ResourceRouter: Send + Sync + 'static {
    /// Routes one request.
    fn route<'a>(
        &'a self,
        ctx: &'a RequestContext,
        request: &'a Request,
        sub_path: &'a str,
    ) -> BoxFuture<'a, RouteResult>;
}

/// A router built from a closure.
///
/// The closure runs synchronously and returns a `'static` future, so it
/// should copy out of the context whatever the future needs.
pub struct FnRouter<F> {
    func: F,
}

impl<F> FnRouter<F> {
    /// Creates a new function-based router.
    pub fn new<Fut>(func: F) -> Self
    where
        F: Fn(&RequestContext, &Request, &str) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RouteResult> + Send + 'static,
    {
        Self { func }
    }
}

impl<F, Fut> ResourceRouter for FnRouter<F>
where
    F: Fn(&RequestContext, &Request, &str) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RouteResult> + Send + 'static,
{
    fn route<'a>(
        &'a self,
        ctx: &'a RequestContext,
        request: &'a Request,
        sub_path: &'a str,
    ) -> BoxFuture<'a, RouteResult> {
        Box::pin((self.func)(ctx, request, sub_path))
    }
}

struct Mount {
    prefix: String,
    router: Arc<dyn ResourceRouter>,
}

/// The dispatch stage.
#[derive(Default)]
pub struct Dispatcher {
    mounts: Vec<Mount>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("prefixes", &self.prefixes())
            .finish()
    }
}

impl Dispatcher {
    /// Creates a dispatcher with no routers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mounts a router at `prefix`.
    pub fn mount<R: ResourceRouter>(self, prefix: impl Into<String>, router: R) -> Result<Self, PipelineError> {
        self.mount_shared(prefix, Arc::new(router))
    }

    /// Mounts an already shared router at `prefix`.
    pub fn mount_shared(
        mut self,
        prefix: impl Into<String>,
        router: Arc<dyn ResourceRouter>,
    ) -> Result<Self, PipelineError> {
        let prefix = prefix.into();
        if !prefix.starts_with('/') {
            return Err(PipelineError::InvalidPrefix {
                prefix,
                reason: "must start with '/'".to_string(),
            });
        }

        let normalized = match prefix.trim_end_matches('/') {
            "" => "/".to_string(),
            trimmed => trimmed.to_string(),
        };
        if self.mounts.iter().any(|m| m.prefix == normalized) {
            return Err(PipelineError::InvalidPrefix {
                prefix,
                reason: "already mounted".to_string(),
            });
        }

        self.mounts.push(Mount {
            prefix: normalized,
            router,
        });
        Ok(self)
    }

    /// Mounted prefixes in dispatch order.
    #[must_use]
    pub fn prefixes(&self) -> Vec<&str> {
        self.mounts.iter().map(|m| m.prefix.as_str()).collect()
    }
}

/// Path below `prefix`, always starting with `/`.
fn sub_path<'p>(prefix: &str, path: &'p str) -> &'p str {
    if prefix == "/" {
        return path;
    }
    match path.get(prefix.len()..) {
        Some("") | None => "/",
        Some(rest) => rest,
    }
}

impl Stage for Dispatcher {
    fn name(&self) -> &'static str {
        "dispatch"
    }

    fn phase(&self) -> Phase {
        Phase::Dispatch
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: &'a mut Request,
    ) -> BoxFuture<'a, StageOutcome> {
        Box::pin(async move {
            let ctx = &*ctx;
            let request = &*request;

            for mount in &self.mounts {
                if !matches_prefix(&mount.prefix, ctx.path()) {
                    continue;
                }
                let rest = sub_path(&mount.prefix, ctx.path());
                match mount.router.route(ctx, request, rest).await {
                    Ok(Some(response)) => {
                        tracing::debug!(prefix = %mount.prefix, status = response.status().as_u16(), "router claimed request");
                        return StageOutcome::Respond(response);
                    }
                    Ok(None) => {}
                    Err(error) => return StageOutcome::Fail(error),
                }
            }
            StageOutcome::Continue
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResponseExt;
    use bytes::Bytes;
    use http::{Method, StatusCode};
    use http_body_util::Full;
    use trailhead_core::DefectKind;

    fn echo_router(tag: &'static str) -> impl ResourceRouter {
        FnRouter::new(move |_ctx: &RequestContext, _req: &Request, sub_path: &str| {
            let claimed = sub_path != "/skip";
            let body = serde_json::json!({"router": tag, "sub_path": sub_path});
            async move { Ok(claimed.then(|| Response::json(StatusCode::OK, &body))) }
        })
    }

    async fn dispatch(dispatcher: &Dispatcher, path: &str) -> StageOutcome {
        let mut ctx = RequestContext::new(Method::GET, path.parse().unwrap());
        let mut request = http::Request::builder()
            .uri(path)
            .body(Full::new(Bytes::new()))
            .unwrap();
        dispatcher.process(&mut ctx, &mut request).await
    }

    async fn body_of(outcome: StageOutcome) -> serde_json::Value {
        let StageOutcome::Respond(response) = outcome else {
            panic!("expected response, got {outcome:?}");
        };
        serde_json::from_slice(&crate::types::collect_body(response.into_body()).await).unwrap()
    }

    #[tokio::test]
    async fn test_routes_by_prefix() {
        let dispatcher = Dispatcher::new()
            .mount("/api/v1/tours", echo_router("tours"))
            .unwrap()
            .mount("/api/v1/users/", echo_router("users"))
            .unwrap();

        let body = body_of(dispatch(&dispatcher, "/api/v1/tours/5c88fa8cf4afda39709c2955").await).await;
        assert_eq!(body["router"], "tours");
        assert_eq!(body["sub_path"], "/5c88fa8cf4afda39709c2955");

        let body = body_of(dispatch(&dispatcher, "/api/v1/users").await).await;
        assert_eq!(body["router"], "users");
        assert_eq!(body["sub_path"], "/");
    }

    #[tokio::test]
    async fn test_prefix_is_segment_aware() {
        let dispatcher = Dispatcher::new().mount("/api/v1/tours", echo_router("tours")).unwrap();
        assert!(dispatch(&dispatcher, "/api/v1/toursx").await.is_continue());
    }

    #[tokio::test]
    async fn test_unclaimed_falls_through() {
        let dispatcher = Dispatcher::new()
            .mount("/api/v1", echo_router("versioned"))
            .unwrap()
            .mount("/api", echo_router("catch_all"))
            .unwrap();
        let body = body_of(dispatch(&dispatcher, "/api/v1/skip").await).await;
        assert_eq!(body["router"], "catch_all");
        assert_eq!(body["sub_path"], "/v1/skip");

        let only = Dispatcher::new().mount("/api/v1", echo_router("only")).unwrap();
        assert!(dispatch(&only, "/api/v1/skip").await.is_continue());
    }

    #[tokio::test]
    async fn test_router_error_fails() {
        let router = FnRouter::new(|_: &RequestContext, _: &Request, _: &str| async {
            Err(AppError::defect(DefectKind::MalformedId {
                path: "_id".to_string(),
                value: "x".to_string(),
            }))
        });
        let dispatcher = Dispatcher::new().mount("/api/v1/reviews", router).unwrap();
        let outcome = dispatch(&dispatcher, "/api/v1/reviews/x").await;
        assert!(matches!(outcome, StageOutcome::Fail(e) if e.defect_kind().is_some()));
    }

    #[test]
    fn test_invalid_prefixes() {
        assert!(matches!(
            Dispatcher::new().mount("api", echo_router("x")),
            Err(PipelineError::InvalidPrefix { .. })
        ));
        let result = Dispatcher::new()
            .mount("/api", echo_router("a"))
            .unwrap()
            .mount("/api/", echo_router("b"));
        assert!(matches!(result, Err(PipelineError::InvalidPrefix { .. })));
    }

    #[test]
    fn test_sub_path() {
        assert_eq!(sub_path("/api/v1/tours", "/api/v1/tours"), "/");
        assert_eq!(sub_path("/api/v1/tours", "/api/v1/tours/top-5-cheap"), "/top-5-cheap");
        assert_eq!(sub_path("/", "/anything"), "/anything");
    }
}
