//! Core stage trait and types.
//!
//! This module defines the [`Stage`] trait that every pipeline step
//! implements. A stage inspects or enriches the request on the way in and
//! reports an explicit [`StageOutcome`]; the pipeline driver, not the
//! stage, decides what happens next.
//!
//! # Example
//!
//! ```
//! use trailhead_middleware::{BoxFuture, Phase, Request, Stage, StageOutcome};
//! use trailhead_middleware::context::RequestContext;
//!
//! struct MaintenanceGate;
//!
//! impl Stage for MaintenanceGate {
//!     fn name(&self) -> &'static str {
//!         "maintenance"
//!     }
//!
//!     fn phase(&self) -> Phase {
//!         Phase::Dispatch
//!     }
//!
//!     fn process<'a>(
//!         &'a self,
//!         _ctx: &'a mut RequestContext,
//!         _request: &'a mut Request,
//!     ) -> BoxFuture<'a, StageOutcome> {
//!         Box::pin(async { StageOutcome::Continue })
//!     }
//! }
//! ```

use crate::context::RequestContext;
use crate::pipeline::Phase;
use crate::types::{Request, Response};
use std::future::Future;
use std::pin::Pin;
use trailhead_core::AppError;

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What a stage decided about the current request.
#[derive(Debug)]
pub enum StageOutcome {
    /// Hand the request to the next stage.
    Continue,
    /// Stop here and send this response.
    Respond(Response),
    /// Stop here; the classifier turns the error into the response.
    Fail(AppError),
}

impl StageOutcome {
    /// Returns `true` for [`StageOutcome::Continue`].
    pub fn is_continue(&self) -> bool {
        matches!(self, Self::Continue)
    }
}

impl From<AppError> for StageOutcome {
    fn from(error: AppError) -> Self {
        Self::Fail(error)
    }
}

/// A single step of the request pipeline.
///
/// # Invariants
///
/// - A stage MUST NOT emit more than one response
/// - `finalize` MUST return the response it was given, possibly decorated
/// - A stage's phase is fixed for its lifetime
pub trait Stage: Send + Sync + 'static {
    /// Returns the unique name of this stage.
    ///
    /// This name is used for logging and build errors.
    fn name(&self) -> &'static str;

    /// The pipeline position this stage occupies.
    fn phase(&self) -> Phase;

    /// Processes the request on the way in.
    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: &'a mut Request,
    ) -> BoxFuture<'a, StageOutcome>;

    /// Decorates the outgoing response.
    ///
    /// Runs for every stage whose `process` ran, in reverse order, no matter
    /// which component produced the response.
    fn finalize<'a>(&'a self, _ctx: &'a RequestContext, response: Response) -> BoxFuture<'a, Response> {
        Box::pin(std::future::ready(response))
    }
}

/// A stage built from a synchronous closure.
///
/// # Example
///
/// ```
/// use trailhead_middleware::{FnStage, Phase, StageOutcome};
///
/// let stage = FnStage::new("noop", Phase::Sanitize, |_ctx, _req| StageOutcome::Continue);
/// ```
pub struct FnStage<F> {
    name: &'static str,
    phase: Phase,
    func: F,
}

impl<F> FnStage<F>
where
    F: Fn(&mut RequestContext, &mut Request) -> StageOutcome + Send + Sync + 'static,
{
    /// Creates a new function-based stage.
    pub fn new(name: &'static str, phase: Phase, func: F) -> Self {
        Self { name, phase, func }
    }
}

impl<F> Stage for FnStage<F>
where
    F: Fn(&mut RequestContext, &mut Request) -> StageOutcome + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn phase(&self) -> Phase {
        self.phase
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: &'a mut Request,
    ) -> BoxFuture<'a, StageOutcome> {
        let outcome = (self.func)(ctx, request);
        Box::pin(std::future::ready(outcome))
    }
}
