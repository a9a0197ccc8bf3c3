//! Rate limiting for the callback routes using a token bucket

use axum::{
    extract::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    clock::QuantaClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use prospectforge_common::errors::AppError;
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter using governor crate
pub type GlobalRateLimiter = RateLimiter<NotKeyed, InMemoryState, QuantaClock>;

/// A limiter together with the rate it enforces
pub struct CallbackLimiter {
    limiter: GlobalRateLimiter,
    requests_per_second: u32,
}

impl CallbackLimiter {
    pub fn check(&self) -> Result<(), AppError> {
        self.limiter.check().map_err(|_| AppError::RateLimited {
            limit: self.requests_per_second,
        })
    }
}

/// Create a new rate limiter. Zero values are raised to one.
pub fn create_rate_limiter(requests_per_second: u32, burst: u32) -> Arc<CallbackLimiter> {
    let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
    let burst = NonZeroU32::new(burst).unwrap_or(rate);

    Arc::new(CallbackLimiter {
        limiter: RateLimiter::direct(Quota::per_second(rate).allow_burst(burst)),
        requests_per_second: rate.get(),
    })
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    request: Request,
    next: Next,
    limiter: Arc<CallbackLimiter>,
) -> Response {
    match limiter.check() {
        Ok(()) => next.run(request).await,
        Err(e) => {
            tracing::warn!(path = %request.uri().path(), "Rate limit exceeded");
            e.into_response()
        }
    }
}
