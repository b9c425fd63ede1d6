//! Rate limiting stage.
//!
//! Fixed-window admission control keyed by client address. Every request
//! under the API prefix counts against one shared quota per client; once the
//! count exceeds the quota inside the current window the request fails with
//! `429 Too Many Requests`.
//!
//! ## Algorithm
//!
//! - No record, or the window elapsed: reset to `{count: 1, window_start: now}`
//! - Otherwise: `count += 1`
//! - `count > limit`: reject
//!
//! Increments are never rolled back, even if the request is later abandoned.
//!
//! ## Example
//!
//! ```
//! use trailhead_middleware::stages::rate_limit::{ManualClock, RateLimiter};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let clock = Arc::new(ManualClock::new());
//! let limiter = RateLimiter::builder()
//!     .limit(100)
//!     .window(Duration::from_secs(3600))
//!     .path_prefix("/api")
//!     .clock(clock)
//!     .build();
//! ```

use crate::context::RequestContext;
use crate::middleware::{BoxFuture, Stage, StageOutcome};
use crate::pipeline::Phase;
use crate::stages::matches_prefix;
use crate::types::{Request, Response};
use dashmap::DashMap;
use http::{HeaderValue, StatusCode};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use trailhead_core::AppError;
use trailhead_telemetry::metrics::record_rate_limited;

/// Message sent when a client exhausts its quota.
pub const DEFAULT_MESSAGE: &str = "Too many requests from this IP, Please try again in an hour!";

/// Rate limit header names.
pub mod headers {
    /// Maximum requests allowed in the window.
    pub const LIMIT: &str = "x-ratelimit-limit";
    /// Remaining requests in current window.
    pub const REMAINING: &str = "x-ratelimit-remaining";
    /// Seconds until the window resets.
    pub const RESET: &str = "x-ratelimit-reset";
    /// Seconds to wait before retrying (on 429).
    pub const RETRY_AFTER: &str = "retry-after";
}

/// Source of monotonic time for window arithmetic.
pub trait Clock: Send + Sync + 'static {
    /// The current instant.
    fn now(&self) -> Instant;
}

/// Wall-clock-independent time from [`Instant::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// Creates a clock frozen at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }
}

/// Per-client counter state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowRecord {
    /// Requests counted in the current window.
    pub count: u64,
    /// When the current window opened.
    pub window_start: Instant,
}

impl WindowRecord {
    /// Whether the window has fully elapsed at `now`.
    #[must_use]
    pub fn is_expired(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.window_start) >= window
    }
}

/// Storage for window records.
///
/// `hit` must be atomic per key: two concurrent hits on the same key never
/// observe the same count.
pub trait WindowStore: Send + Sync + 'static {
    /// Counts one request for `key` and returns the updated record.
    fn hit(&self, key: &str, now: Instant, window: Duration) -> WindowRecord;

    /// Returns the current record for `key`, if any.
    fn get(&self, key: &str) -> Option<WindowRecord>;

    /// Drops records whose window elapsed, returning how many were removed.
    fn purge_expired(&self, now: Instant, window: Duration) -> usize;
}

/// In-process [`WindowStore`] backed by a sharded concurrent map.
#[derive(Debug, Default)]
pub struct MemoryWindowStore {
    records: DashMap<String, WindowRecord>,
}

impl MemoryWindowStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no client is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl WindowStore for MemoryWindowStore {
    fn hit(&self, key: &str, now: Instant, window: Duration) -> WindowRecord {
        // The entry guard holds the shard lock for the whole read-modify-write.
        let mut entry = self.records.entry(key.to_string()).or_insert(WindowRecord {
            count: 0,
            window_start: now,
        });
        let record = entry.value_mut();
        if record.count == 0 || record.is_expired(now, window) {
            *record = WindowRecord {
                count: 1,
                window_start: now,
            };
        } else {
            record.count += 1;
        }
        *record
    }

    fn get(&self, key: &str) -> Option<WindowRecord> {
        self.records.get(key).map(|r| *r)
    }

    fn purge_expired(&self, now: Instant, window: Duration) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| !record.is_expired(now, window));
        before.saturating_sub(self.records.len())
    }
}

/// Result of checking rate limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Request is allowed.
    Allowed {
        /// Remaining requests in window.
        remaining: u64,
        /// Time until window resets.
        reset_after: Duration,
    },
    /// Request is rate limited.
    Limited {
        /// Time until requests are allowed again.
        retry_after: Duration,
    },
}

/// Limit decision kept for the response finalizer.
#[derive(Debug, Clone, Copy)]
struct LimitState {
    limit: u64,
    result: RateLimitResult,
}

/// The rate limiting stage.
pub struct RateLimiter {
    limit: u64,
    window: Duration,
    path_prefix: String,
    message: String,
    headers: bool,
    store: Arc<dyn WindowStore>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("limit", &self.limit)
            .field("window", &self.window)
            .field("path_prefix", &self.path_prefix)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Builder for [`RateLimiter`].
pub struct RateLimiterBuilder {
    limit: u64,
    window: Duration,
    path_prefix: String,
    message: String,
    headers: bool,
    store: Option<Arc<dyn WindowStore>>,
    clock: Option<Arc<dyn Clock>>,
}

impl Default for RateLimiterBuilder {
    fn default() -> Self {
        Self {
            limit: 100,
            window: Duration::from_secs(3600),
            path_prefix: "/api".to_string(),
            message: DEFAULT_MESSAGE.to_string(),
            headers: true,
            store: None,
            clock: None,
        }
    }
}

impl RateLimiterBuilder {
    /// Maximum requests per client per window.
    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    /// Window length.
    #[must_use]
    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Only paths under this prefix are counted.
    #[must_use]
    pub fn path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = prefix.into();
        self
    }

    /// Message for rejected requests.
    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Attach `X-RateLimit-*` headers to counted responses.
    #[must_use]
    pub fn headers(mut self, enabled: bool) -> Self {
        self.headers = enabled;
        self
    }

    /// Shares an existing store.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn WindowStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Injects a clock.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Builds the stage.
    #[must_use]
    pub fn build(self) -> RateLimiter {
        RateLimiter {
            limit: self.limit,
            window: self.window,
            path_prefix: self.path_prefix,
            message: self.message,
            headers: self.headers,
            store: self.store.unwrap_or_else(|| Arc::new(MemoryWindowStore::new())),
            clock: self.clock.unwrap_or_else(|| Arc::new(MonotonicClock)),
        }
    }
}

impl RateLimiter {
    /// Creates a new rate limiter builder.
    #[must_use]
    pub fn builder() -> RateLimiterBuilder {
        RateLimiterBuilder::default()
    }

    /// Returns the window store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn WindowStore> {
        &self.store
    }

    /// Whether requests to `path` are counted.
    #[must_use]
    pub fn applies_to(&self, path: &str) -> bool {
        matches_prefix(&self.path_prefix, path)
    }

    /// Counts one request for `key` and decides on it.
    pub fn check(&self, key: &str) -> RateLimitResult {
        let now = self.clock.now();
        let record = self.store.hit(key, now, self.window);
        let elapsed = now.saturating_duration_since(record.window_start);
        let reset_after = self.window.saturating_sub(elapsed);

        if record.count > self.limit {
            RateLimitResult::Limited {
                retry_after: reset_after,
            }
        } else {
            RateLimitResult::Allowed {
                remaining: self.limit - record.count,
                reset_after,
            }
        }
    }

    /// Drops expired records from the store.
    pub fn purge_expired(&self) -> usize {
        self.store.purge_expired(self.clock.now(), self.window)
    }
}

/// Whole seconds, rounded up.
fn ceil_secs(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

impl Stage for RateLimiter {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn phase(&self) -> Phase {
        Phase::RateLimit
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        _request: &'a mut Request,
    ) -> BoxFuture<'a, StageOutcome> {
        Box::pin(async move {
            if !self.applies_to(ctx.path()) {
                return StageOutcome::Continue;
            }

            let key = ctx.client_key();
            let result = self.check(&key);
            ctx.set_extension(LimitState {
                limit: self.limit,
                result,
            });

            match result {
                RateLimitResult::Allowed { .. } => StageOutcome::Continue,
                RateLimitResult::Limited { retry_after } => {
                    record_rate_limited();
                    tracing::warn!(
                        client = %key,
                        retry_after_secs = ceil_secs(retry_after),
                        "rate limit exceeded"
                    );
                    StageOutcome::Fail(AppError::too_many_requests(self.message.clone()))
                }
            }
        })
    }

    fn finalize<'a>(&'a self, ctx: &'a RequestContext, mut response: Response) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            if !self.headers {
                return response;
            }
            let Some(state) = ctx.get_extension::<LimitState>() else {
                return response;
            };

            let headers = response.headers_mut();
            headers.insert(headers::LIMIT, HeaderValue::from(state.limit));
            match state.result {
                RateLimitResult::Allowed {
                    remaining,
                    reset_after,
                } => {
                    headers.insert(headers::REMAINING, HeaderValue::from(remaining));
                    headers.insert(headers::RESET, HeaderValue::from(ceil_secs(reset_after)));
                }
                RateLimitResult::Limited { retry_after } => {
                    let secs = HeaderValue::from(ceil_secs(retry_after));
                    headers.insert(headers::REMAINING, HeaderValue::from(0_u64));
                    headers.insert(headers::RESET, secs.clone());
                    if response.status() == StatusCode::TOO_MANY_REQUESTS {
                        response.headers_mut().insert(headers::RETRY_AFTER, secs);
                    }
                }
            }
            response
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::Method;
    use http_body_util::Full;

    fn limiter(limit: u64, clock: &Arc<ManualClock>) -> RateLimiter {
        RateLimiter::builder()
            .limit(limit)
            .window(Duration::from_secs(3600))
            .clock(Arc::clone(clock) as Arc<dyn Clock>)
            .build()
    }

    async fn process(limiter: &RateLimiter, path: &str) -> (RequestContext, StageOutcome) {
        let mut ctx = RequestContext::new(Method::GET, path.parse().unwrap());
        ctx.set_client_addr(Some("198.51.100.4".parse().unwrap()));
        let mut request = http::Request::new(Full::new(Bytes::new()));
        let outcome = limiter.process(&mut ctx, &mut request).await;
        (ctx, outcome)
    }

    #[test]
    fn test_quota_then_reject() {
        let clock = Arc::new(ManualClock::new());
        let limiter = limiter(3, &clock);

        for expected in [2, 1, 0] {
            assert!(matches!(
                limiter.check("a"),
                RateLimitResult::Allowed { remaining, .. } if remaining == expected
            ));
        }
        assert!(matches!(limiter.check("a"), RateLimitResult::Limited { .. }));
        // other clients keep their own counters
        assert!(matches!(limiter.check("b"), RateLimitResult::Allowed { .. }));
    }

    #[test]
    fn test_window_reset() {
        let clock = Arc::new(ManualClock::new());
        let limiter = limiter(1, &clock);

        assert!(matches!(limiter.check("a"), RateLimitResult::Allowed { .. }));
        assert!(matches!(limiter.check("a"), RateLimitResult::Limited { .. }));

        clock.advance(Duration::from_secs(3599));
        assert!(matches!(limiter.check("a"), RateLimitResult::Limited { .. }));

        clock.advance(Duration::from_secs(1));
        assert!(matches!(limiter.check("a"), RateLimitResult::Allowed { .. }));
    }

    #[test]
    fn test_retry_after_counts_down() {
        let clock = Arc::new(ManualClock::new());
        let limiter = limiter(0, &clock);
        clock.advance(Duration::from_millis(1500));
        let RateLimitResult::Limited { retry_after } = limiter.check("a") else {
            panic!("expected limit");
        };
        assert_eq!(retry_after, Duration::from_secs(3600));
        clock.advance(Duration::from_millis(1500));
        let RateLimitResult::Limited { retry_after } = limiter.check("a") else {
            panic!("expected limit");
        };
        assert_eq!(ceil_secs(retry_after), 3599);
    }

    #[test]
    fn test_purge_expired() {
        let clock = Arc::new(ManualClock::new());
        let store = Arc::new(MemoryWindowStore::new());
        let limiter = RateLimiter::builder()
            .window(Duration::from_secs(60))
            .store(Arc::clone(&store) as Arc<dyn WindowStore>)
            .clock(Arc::clone(&clock) as Arc<dyn Clock>)
            .build();

        limiter.check("a");
        clock.advance(Duration::from_secs(30));
        limiter.check("b");
        clock.advance(Duration::from_secs(30));

        assert_eq!(limiter.purge_expired(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.get("b").is_some());
    }

    #[test]
    fn test_concurrent_hits_are_counted_once_each() {
        let store = Arc::new(MemoryWindowStore::new());
        let now = Instant::now();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        store.hit("shared", now, Duration::from_secs(60));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.get("shared").unwrap().count, 2000);
    }

    #[tokio::test]
    async fn test_paths_outside_prefix_not_counted() {
        let clock = Arc::new(ManualClock::new());
        let limiter = limiter(0, &clock);
        let (ctx, outcome) = process(&limiter, "/apis/health").await;
        assert!(outcome.is_continue());
        assert!(limiter.store().get(&ctx.client_key()).is_none());
    }

    #[tokio::test]
    async fn test_rejection_and_headers() {
        let clock = Arc::new(ManualClock::new());
        let limiter = limiter(1, &clock);

        let (ctx, outcome) = process(&limiter, "/api/v1/tours").await;
        assert!(outcome.is_continue());
        let response = limiter
            .finalize(&ctx, Response::new(Full::new(Bytes::new())))
            .await;
        assert_eq!(response.headers()[headers::LIMIT], "1");
        assert_eq!(response.headers()[headers::REMAINING], "0");
        assert_eq!(response.headers()[headers::RESET], "3600");

        let (ctx, outcome) = process(&limiter, "/api/v1/tours").await;
        let StageOutcome::Fail(error) = outcome else {
            panic!("expected rate limit failure");
        };
        assert_eq!(error.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(error.message(), DEFAULT_MESSAGE);
        assert!(error.is_operational());

        let mut limited = Response::new(Full::new(Bytes::new()));
        *limited.status_mut() = StatusCode::TOO_MANY_REQUESTS;
        let response = limiter.finalize(&ctx, limited).await;
        assert_eq!(response.headers()[headers::RETRY_AFTER], "3600");
    }

    #[tokio::test]
    async fn test_headers_disabled() {
        let limiter = RateLimiter::builder().headers(false).build();
        let (ctx, _) = process(&limiter, "/api").await;
        let response = limiter
            .finalize(&ctx, Response::new(Full::new(Bytes::new())))
            .await;
        assert!(response.headers().get(headers::LIMIT).is_none());
    }
}
