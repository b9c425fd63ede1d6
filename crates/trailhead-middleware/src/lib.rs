//! # Trailhead Middleware
//!
//! The fixed-order request pipeline that fronts an HTTP API.
//!
//! Every request passes through the same stages in the same order. A stage
//! may let the request continue, answer it, or fail it; failures go to the
//! error classifier, which is the only component that turns an error into a
//! response.
//!
//! ## Pipeline Stages
//!
//! ```text
//! Request → CORS → Security → RateLimit → BodyParse → Sanitize → Compression → Dispatch → NotFound
//!                                                                                  ↓
//! Response ← finalizers (reverse order) ← ErrorClassifier ←─────────────────────────┘
//! ```
//!
//! | Phase | Stage              | Purpose                                          |
//! |-------|--------------------|--------------------------------------------------|
//! | 1     | CORS               | Origin policy, `OPTIONS` preflight answered 204  |
//! | 2     | Security Headers   | Protective response headers                      |
//! | 3     | Rate Limit         | Fixed window per client under `/api`             |
//! | 4     | Body Parse         | Query parsing, JSON body with a size ceiling     |
//! | 5     | Sanitize           | Operator and markup stripping, pollution collapse|
//! | 6     | Compression        | `Accept-Encoding` negotiation                    |
//! | 7     | Dispatch           | Tours, users and reviews routers                 |
//! | 8     | Fallback           | 404 for anything unclaimed                       |
//!
//! ## Example
//!
//! ```
//! use trailhead_middleware::stages::{NotFound, Sanitizer};
//! use trailhead_middleware::{Phase, Pipeline};
//!
//! let pipeline = Pipeline::builder()
//!     .stage(Sanitizer::new())
//!     .stage(NotFound)
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(pipeline.phases(), vec![Phase::Sanitize, Phase::Fallback]);
//! ```

#![doc(html_root_url = "https://docs.rs/trailhead-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod context;
pub mod middleware;
pub mod pipeline;
pub mod query;
pub mod stages;
pub mod types;

// Re-export main types at crate root
pub use context::RequestContext;
pub use middleware::{BoxFuture, FnStage, Stage, StageOutcome};
pub use pipeline::{Phase, Pipeline, PipelineBuilder, PipelineError};
pub use types::{Request, Response, ResponseExt};
