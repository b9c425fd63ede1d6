//! Pipeline stage implementations.
//!
//! Stages in phase order:
//!
//! 1. [`cors`] - Origin policy and preflight
//! 2. [`security`] - Protective response headers
//! 3. [`rate_limit`] - Fixed-window admission control
//! 4. [`body`] - Query and JSON body parsing
//! 5. [`sanitize`] - Injection stripping and pollution collapse
//! 6. [`compression`] - Response compression
//! 7. [`dispatch`] - Resource routers
//! 8. [`not_found`] - Fallback for unclaimed requests
//!
//! [`error_classifier`] turns any failure into the response.

pub mod body;
#[cfg(feature = "compression")]
pub mod compression;
pub mod cors;
pub mod dispatch;
pub mod error_classifier;
pub mod not_found;
pub mod rate_limit;
pub mod sanitize;
pub mod security;

pub use body::BodyParser;
#[cfg(feature = "compression")]
pub use compression::{Algorithm, CompressionStage};
pub use cors::{AllowedOrigins, CorsBuilder, CorsStage};
pub use dispatch::{Dispatcher, FnRouter, ResourceRouter};
pub use error_classifier::ErrorClassifier;
pub use not_found::NotFound;
pub use rate_limit::{
    Clock, ManualClock, MemoryWindowStore, MonotonicClock, RateLimiter, WindowRecord, WindowStore,
};
pub use sanitize::Sanitizer;
pub use security::SecurityHeaders;

/// Segment-aware prefix match: `/api` covers `/api` and `/api/x`, not `/apis`.
pub(crate) fn matches_prefix(prefix: &str, path: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::matches_prefix;

    #[test]
    fn test_matches_prefix() {
        assert!(matches_prefix("/api", "/api"));
        assert!(matches_prefix("/api", "/api/v1/tours"));
        assert!(matches_prefix("/api/", "/api/v1"));
        assert!(!matches_prefix("/api", "/apis"));
        assert!(!matches_prefix("/api", "/"));
        assert!(matches_prefix("/", "/anything"));
    }
}
