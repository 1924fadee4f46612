//! In-process fixed window rate limiting for actix-web.
//!
//! [FixedWindowLimiter] is a synchronous per-key counter, suitable for guarding individual
//! operations such as invite redemption or login attempts. [RateLimiter] wraps a
//! [Backend](backend::Backend) as actix-web middleware, answering over-quota requests with a 429.

pub mod backend;
mod error;
mod limiter;
mod middleware;
mod quota;

pub use error::Error;
pub use limiter::{rate_limiter, FixedWindowLimiter};
pub use middleware::builder::{
    RateLimiterBuilder, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
};
pub use middleware::{RateLimiter, RateLimiterMiddleware};
pub use quota::{Quota, MAX_WINDOW};
