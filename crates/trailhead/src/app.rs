//! Application assembly.
//!
//! [`App`] turns a validated [`TrailheadConfig`] into the complete pipeline:
//! one stage per configuration section, the three resource routers mounted
//! under `/api/v1`, the not-found fallback, and a classifier running in the
//! configured deployment mode.

use crate::error::TrailheadResult;
use http::Method;
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use trailhead_config::{ConfigError, CorsConfig, TrailheadConfig};
use trailhead_middleware::pipeline::BoxedStage;
use trailhead_middleware::stages::{
    AllowedOrigins, BodyParser, Clock, CorsStage, Dispatcher, ErrorClassifier, NotFound,
    RateLimiter, ResourceRouter, Sanitizer, SecurityHeaders, WindowStore,
};
use trailhead_middleware::{Pipeline, Request, Response};

/// The resources served under `/api/v1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Resource {
    /// `/api/v1/tours`
    Tours,
    /// `/api/v1/users`
    Users,
    /// `/api/v1/reviews`
    Reviews,
}

impl Resource {
    /// Mount prefix of the resource.
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Tours => "/api/v1/tours",
            Self::Users => "/api/v1/users",
            Self::Reviews => "/api/v1/reviews",
        }
    }

    /// All resources in mount order.
    pub const fn all() -> [Resource; 3] {
        [Self::Tours, Self::Users, Self::Reviews]
    }
}

/// A fully assembled request pipeline.
///
/// Cheap to clone; clones share the pipeline and the rate-limit store.
///
/// # Example
///
/// ```
/// use trailhead::{App, TrailheadConfig};
///
/// let app = App::builder(TrailheadConfig::default()).build().unwrap();
/// assert_eq!(app.pipeline().stage_count(), 8);
/// ```
#[derive(Clone)]
pub struct App {
    pipeline: Arc<Pipeline>,
    config: Arc<TrailheadConfig>,
    limiter: Option<Arc<RateLimiter>>,
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("pipeline", &self.pipeline)
            .field("mode", &self.config.mode)
            .finish_non_exhaustive()
    }
}

impl App {
    /// Starts building an app from `config`.
    pub fn builder(config: TrailheadConfig) -> AppBuilder {
        AppBuilder::new(config)
    }

    /// Runs one request through the pipeline.
    ///
    /// `peer` is the connection's remote address, if known.
    pub async fn handle(&self, request: Request, peer: Option<SocketAddr>) -> Response {
        self.pipeline.handle(request, peer).await
    }

    /// The assembled pipeline.
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// The configuration the app was built from.
    pub fn config(&self) -> &TrailheadConfig {
        &self.config
    }

    /// Drops rate-limit windows that have elapsed. Returns how many went.
    pub fn purge_expired_windows(&self) -> usize {
        self.limiter.as_ref().map_or(0, |limiter| limiter.purge_expired())
    }

    /// Spawns a task that purges elapsed rate-limit windows every `every`.
    ///
    /// Returns `None` when rate limiting is disabled. Must be called from
    /// inside a tokio runtime; abort the handle to stop the task.
    pub fn spawn_window_sweeper(&self, every: Duration) -> Option<JoinHandle<()>> {
        let limiter = self.limiter.clone()?;
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let purged = limiter.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "purged expired rate-limit windows");
                }
            }
        }))
    }
}

/// Builder for [`App`].
pub struct AppBuilder {
    config: TrailheadConfig,
    routers: BTreeMap<Resource, Arc<dyn ResourceRouter>>,
    store: Option<Arc<dyn WindowStore>>,
    clock: Option<Arc<dyn Clock>>,
}

impl AppBuilder {
    /// Creates a builder with no routers mounted.
    pub fn new(config: TrailheadConfig) -> Self {
        Self {
            config,
            routers: BTreeMap::new(),
            store: None,
            clock: None,
        }
    }

    /// Mounts `router` for `resource`, replacing any earlier one.
    pub fn router<R: ResourceRouter>(mut self, resource: Resource, router: R) -> Self {
        self.routers.insert(resource, Arc::new(router));
        self
    }

    /// Mounts the tours router.
    pub fn tours<R: ResourceRouter>(self, router: R) -> Self {
        self.router(Resource::Tours, router)
    }

    /// Mounts the users router.
    pub fn users<R: ResourceRouter>(self, router: R) -> Self {
        self.router(Resource::Users, router)
    }

    /// Mounts the reviews router.
    pub fn reviews<R: ResourceRouter>(self, router: R) -> Self {
        self.router(Resource::Reviews, router)
    }

    /// Uses `store` for rate-limit windows instead of a fresh in-memory one.
    pub fn window_store(mut self, store: Arc<dyn WindowStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Uses `clock` for rate-limit windows.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validates the configuration and assembles the pipeline.
    pub fn build(self) -> TrailheadResult<App> {
        self.config.validate()?;
        let config = &self.config;

        let mut builder = Pipeline::builder()
            .classifier(ErrorClassifier::new(config.mode, config.errors.clone()))
            .trust_proxy(config.trust_proxy)
            .stage(cors_stage(&config.cors)?);

        if config.security_headers.enabled {
            let stage = SecurityHeaders::with_overrides(&config.security_headers.overrides)?
                .remove_powered_by(config.security_headers.remove_powered_by);
            builder = builder.stage(stage);
        }

        let limiter = config.rate_limit.enabled.then(|| {
            let section = &config.rate_limit;
            let mut limiter = RateLimiter::builder()
                .limit(section.max_requests)
                .window(Duration::from_secs(section.window_secs))
                .path_prefix(section.path_prefix.clone())
                .message(section.message.clone())
                .headers(section.headers);
            if let Some(store) = &self.store {
                limiter = limiter.store(Arc::clone(store));
            }
            if let Some(clock) = &self.clock {
                limiter = limiter.clock(Arc::clone(clock));
            }
            Arc::new(limiter.build())
        });
        if let Some(limiter) = &limiter {
            builder = builder.boxed_stage(Arc::clone(limiter) as BoxedStage);
        }

        let sanitizer = Sanitizer::new()
            .strip_operators(config.sanitizer.strip_operators)
            .escape_markup(config.sanitizer.escape_markup)
            .collapse_pollution(config.sanitizer.collapse_pollution)
            .whitelist(config.sanitizer.pollution_whitelist.iter().cloned());
        builder = builder
            .stage(BodyParser::new(config.body.limit_bytes))
            .stage(sanitizer);

        #[cfg(feature = "compression")]
        if config.compression.enabled {
            builder = builder.stage(trailhead_middleware::stages::CompressionStage::new(
                config.compression.min_size,
                config.compression.level,
            ));
        }

        let mut dispatcher = Dispatcher::new();
        for (resource, router) in &self.routers {
            dispatcher = dispatcher.mount_shared(resource.prefix(), Arc::clone(router))?;
        }
        let pipeline = builder.stage(dispatcher).stage(NotFound).build()?;

        tracing::info!(
            mode = %config.mode,
            stages = ?pipeline.stage_names(),
            routers = ?self.routers.keys().map(|r| r.prefix()).collect::<Vec<_>>(),
            "pipeline assembled"
        );

        Ok(App {
            pipeline: Arc::new(pipeline),
            config: Arc::new(self.config),
            limiter,
        })
    }
}

fn cors_stage(config: &CorsConfig) -> TrailheadResult<CorsStage> {
    let methods = config
        .allowed_methods
        .iter()
        .map(|method| {
            Method::from_bytes(method.to_ascii_uppercase().as_bytes()).map_err(|_| {
                ConfigError::invalid_value(
                    "cors.allowed_methods",
                    format!("not an HTTP method: {method}"),
                )
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut builder = CorsStage::builder()
        .allowed_origins(AllowedOrigins::from_list(config.allowed_origins.iter().cloned()))
        .allow_methods(methods)
        .allow_headers(config.allowed_headers.iter().cloned())
        .expose_headers(config.expose_headers.iter().cloned())
        .allow_credentials(config.allow_credentials);
    if let Some(secs) = config.max_age_secs {
        builder = builder.max_age(Duration::from_secs(secs));
    }
    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use trailhead_middleware::Phase;

    #[test]
    fn test_default_config_builds_every_phase() {
        let app = App::builder(TrailheadConfig::default()).build().unwrap();
        assert_eq!(app.pipeline().phases(), Phase::all().to_vec());
    }

    #[test]
    fn test_disabled_sections_drop_their_stage() {
        let mut config = TrailheadConfig::default();
        config.rate_limit.enabled = false;
        config.security_headers.enabled = false;
        config.compression.enabled = false;

        let app = App::builder(config).build().unwrap();
        assert_eq!(
            app.pipeline().stage_names(),
            vec!["cors", "body_parse", "sanitize", "dispatch", "not_found"]
        );
        assert_eq!(app.purge_expired_windows(), 0);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = TrailheadConfig::default();
        config.rate_limit.window_secs = 0;
        assert!(matches!(
            App::builder(config).build(),
            Err(crate::TrailheadError::Config(_))
        ));
    }

    #[test]
    fn test_bad_cors_method_is_rejected() {
        let mut config = TrailheadConfig::default();
        config.cors.allowed_methods = vec!["GET".to_string(), "NOT A METHOD".to_string()];
        assert!(matches!(
            App::builder(config).build(),
            Err(crate::TrailheadError::Config(ConfigError::InvalidValue { .. }))
        ));
    }

    #[test]
    fn test_bad_security_override_is_rejected() {
        let mut config = TrailheadConfig::default();
        config
            .security_headers
            .overrides
            .insert("bad header".to_string(), "x".to_string());
        assert!(matches!(
            App::builder(config).build(),
            Err(crate::TrailheadError::Pipeline(_))
        ));
    }

    #[test]
    fn test_resource_prefixes() {
        let prefixes: Vec<_> = Resource::all().iter().map(|r| r.prefix()).collect();
        assert_eq!(prefixes, vec!["/api/v1/tours", "/api/v1/users", "/api/v1/reviews"]);
    }
}
