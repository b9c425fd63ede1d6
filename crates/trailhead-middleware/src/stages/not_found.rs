//! Fallback stage for requests no router claimed.

use crate::context::RequestContext;
use crate::middleware::{BoxFuture, Stage, StageOutcome};
use crate::pipeline::Phase;
use crate::types::Request;
use trailhead_core::AppError;

/// Fails every request that reaches it with an operational 404 naming the
/// original URL, query string included.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotFound;

impl NotFound {
    /// The message sent for `url`.
    pub fn message(url: &str) -> String {
        format!("Can't find {url} on this server!")
    }
}

impl Stage for NotFound {
    fn name(&self) -> &'static str {
        "not_found"
    }

    fn phase(&self) -> Phase {
        Phase::Fallback
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        _request: &'a mut Request,
    ) -> BoxFuture<'a, StageOutcome> {
        let error = AppError::not_found(Self::message(ctx.original_url()));
        Box::pin(std::future::ready(StageOutcome::Fail(error)))
    }
}
