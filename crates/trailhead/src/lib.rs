//! # Trailhead
//!
//! **A protective request pipeline for JSON APIs**
//!
//! Trailhead fronts a set of resource routers with a fixed sequence of
//! stages and guarantees that every request ends in exactly one
//! well-formed response:
//!
//! - **Origin policy** – CORS with `OPTIONS` preflight answered immediately
//! - **Security headers** – the standard protective set on every response
//! - **Rate limiting** – fixed window per client under `/api`
//! - **Body limits** – JSON bodies capped at 10 KiB by default
//! - **Sanitization** – operator keys, markup and parameter pollution removed
//! - **Consistent errors** – one classifier, development and production modes
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use trailhead::prelude::*;
//!
//! let config = ConfigLoader::new()
//!     .with_defaults()
//!     .with_optional_file("trailhead.toml")?
//!     .with_env_prefix("TRAILHEAD")
//!     .load()?;
//!
//! trailhead::init_telemetry(&config)?;
//!
//! let app = App::builder(config)
//!     .tours(tours_router)
//!     .users(users_router)
//!     .reviews(reviews_router)
//!     .build()?;
//!
//! let response = app.handle(request, Some(peer)).await;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Request → CORS → Security → RateLimit → BodyParse → Sanitize → Compression → Dispatch → NotFound
//!                                                                                  ↓
//! Response ← finalizers (reverse order) ← ErrorClassifier ←─────────────────────────┘
//! ```

#![doc(html_root_url = "https://docs.rs/trailhead/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod app;
mod error;
mod observability;

pub use app::{App, AppBuilder, Resource};
pub use error::{TrailheadError, TrailheadResult};
pub use observability::{init_telemetry, telemetry_config};

// Re-export core types
pub use trailhead_core as core;

// Re-export middleware types
pub use trailhead_middleware as middleware;

// Re-export configuration types
pub use trailhead_config as config;
pub use trailhead_config::TrailheadConfig;

// Re-export telemetry types
pub use trailhead_telemetry as telemetry;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust,ignore
/// use trailhead::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{App, AppBuilder, Resource, TrailheadError, TrailheadResult};

    pub use trailhead_core::{
        AppError, AppResult, DefectKind, DefectTranslations, DeploymentMode, RequestId,
    };

    pub use trailhead_config::{ConfigLoader, TrailheadConfig};

    pub use trailhead_middleware::stages::dispatch::RouteResult;
    pub use trailhead_middleware::stages::{FnRouter, ResourceRouter};
    pub use trailhead_middleware::{Request, RequestContext, Response, ResponseExt};
}
