//! Admission control: token buckets and the per-class rate limiter.

mod bucket;
mod limiter;

pub use bucket::{TokenBucket, POLL_INTERVAL};
pub use limiter::{OperationClass, RateLimitMetrics, RateLimiter};
