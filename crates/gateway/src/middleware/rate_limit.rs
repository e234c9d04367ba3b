//! Global rate limiting using a token bucket

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    clock::QuantaClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use researchforge_common::{config::RateLimitConfig, errors::AppError};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter using governor crate
pub type GlobalRateLimiter = RateLimiter<NotKeyed, InMemoryState, QuantaClock>;

/// Limiter plus the quota it enforces
#[derive(Clone)]
pub struct RateLimit {
    limiter: Arc<GlobalRateLimiter>,
    per_second: u32,
}

/// Create the limiter; `None` when limiting is disabled
pub fn create_rate_limiter(config: &RateLimitConfig) -> Option<RateLimit> {
    if !config.enabled {
        return None;
    }
    let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
    let burst = NonZeroU32::new(config.burst).unwrap_or(per_second).max(per_second);

    Some(RateLimit {
        limiter: Arc::new(RateLimiter::direct(Quota::per_second(per_second).allow_burst(burst))),
        per_second: per_second.get(),
    })
}

/// Reject requests over quota with 429
pub async fn rate_limit_middleware(
    State(limit): State<Option<RateLimit>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(limit) = limit else {
        return next.run(request).await;
    };

    match limit.limiter.check() {
        Ok(_) => next.run(request).await,
        Err(_) => {
            tracing::warn!(path = %request.uri().path(), "Rate limit exceeded");
            AppError::RateLimited {
                limit: limit.per_second,
            }
            .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(requests_per_second: u32, burst: u32, enabled: bool) -> RateLimitConfig {
        RateLimitConfig {
            requests_per_second,
            burst,
            enabled,
        }
    }

    #[test]
    fn test_rate_limiter_creation() {
        let limit = create_rate_limiter(&config(100, 200, true)).unwrap();
        assert!(limit.limiter.check().is_ok());
        assert_eq!(limit.per_second, 100);
    }

    #[test]
    fn test_burst_is_enforced() {
        let limit = create_rate_limiter(&config(1, 2, true)).unwrap();
        assert!(limit.limiter.check().is_ok());
        assert!(limit.limiter.check().is_ok());
        assert!(limit.limiter.check().is_err());
    }

    #[test]
    fn test_disabled_and_zero_quota() {
        assert!(create_rate_limiter(&config(10, 10, false)).is_none());
        let limit = create_rate_limiter(&config(0, 0, true)).unwrap();
        assert_eq!(limit.per_second, 1);
    }
}
