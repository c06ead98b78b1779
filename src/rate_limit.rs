//! Rate limiting for authentication endpoints.
//!
//! Uses a token bucket algorithm with per-IP tracking to slow down credential
//! stuffing against `/auth` and signup spam against `/register`.

use axum::{
    Json,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use std::{num::NonZeroU32, sync::Arc, time::Duration};
use tracing::{debug, warn};

use crate::auth::{IpSource, extract_client_ip};

/// Per-IP rate limiter.
pub type IpLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Bucket shared by every request whose client IP cannot be determined.
const UNKNOWN_CLIENT: &str = "unknown";

/// Default quota: 30 requests per minute per IP.
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 30;

/// Interval between sweeps of idle per-IP buckets.
pub const LIMITER_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Rate limiting configuration for authentication endpoints.
#[derive(Clone)]
pub struct RateLimitConfig {
    /// Per-IP limiter shared by login and registration
    pub auth: Arc<IpLimiter>,
    /// Where the per-IP key comes from
    pub ip_source: IpSource,
}

impl RateLimitConfig {
    /// Allow `per_minute` requests per IP, with the same burst. Zero is treated as one.
    pub fn new(per_minute: u32, ip_source: IpSource) -> Self {
        let per_minute = NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            auth: Arc::new(RateLimiter::keyed(Quota::per_minute(per_minute))),
            ip_source,
        }
    }

    /// Drop buckets that have refilled completely, so their keys stop using memory.
    pub fn prune(&self) {
        self.auth.retain_recent();
        self.auth.shrink_to_fit();
    }
}

/// Spawn a background task that prunes idle buckets periodically.
pub fn spawn_limiter_cleanup(config: Arc<RateLimitConfig>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(LIMITER_CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            config.prune();
            debug!(keys = config.auth.len(), "Pruned rate limiter buckets");
        }
    })
}

/// Middleware for rate limiting login and registration.
pub async fn rate_limit_auth(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    let ip = extract_client_ip(&request, config.ip_source)
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string());

    match config.auth.check_key(&ip) {
        Ok(_) => next.run(request).await,
        Err(_) => {
            warn!(ip = %ip, path = %request.uri().path(), "Rate limit exceeded");
            (
                StatusCode::TOO_MANY_REQUESTS,
                Json(serde_json::json!({
                    "error": "Too many authentication attempts. Please wait before trying again."
                })),
            )
                .into_response()
        }
    }
}
