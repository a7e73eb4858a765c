//! Multi-class admission control.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::time::{Duration, Instant};
use tracing::{debug, trace};

use super::bucket::TokenBucket;
use crate::config::RateLimitConfig;

/// The operation classes that get independent admission budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationClass {
    /// Read-only queries
    Query,
    /// Data modification
    Write,
    /// Schema changes and other administrative commands
    Admin,
}

impl OperationClass {
    pub const ALL: [OperationClass; 3] = [
        OperationClass::Query,
        OperationClass::Write,
        OperationClass::Admin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationClass::Query => "query",
            OperationClass::Write => "write",
            OperationClass::Admin => "admin",
        }
    }
}

impl fmt::Display for OperationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "query" => Ok(OperationClass::Query),
            "write" => Ok(OperationClass::Write),
            "admin" => Ok(OperationClass::Admin),
            other => Err(format!("unknown operation class: {}", other)),
        }
    }
}

/// Point-in-time snapshot of the limiter's aggregate counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RateLimitMetrics {
    /// Admission requests of any class
    pub total_ops: u64,
    /// Requests that were not admitted
    pub blocked_ops: u64,
    /// Waiting requests that could not be admitted immediately
    pub throttled_ops: u64,
    /// Rate limit violations
    pub violation_count: u64,
    /// Mean time waiting requests spent before being admitted
    pub avg_wait_time: Duration,
}

impl fmt::Display for RateLimitMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total={} blocked={} throttled={} violations={} avg_wait={:?}",
            self.total_ops,
            self.blocked_ops,
            self.throttled_ops,
            self.violation_count,
            self.avg_wait_time
        )
    }
}

#[derive(Debug, Default)]
struct MetricsState {
    metrics: RateLimitMetrics,
    total_wait: Duration,
    waits: u64,
}

/// Admission control over three independent token buckets.
///
/// Bucket state and aggregate metrics sit behind separate locks so that one
/// class never serializes the others. A metrics snapshot taken while another
/// caller is mid-admission may count that request in `total_ops` before its
/// bucket decision is reflected in `blocked_ops`.
pub struct RateLimiter {
    query: TokenBucket,
    write: TokenBucket,
    admin: TokenBucket,
    metrics: Mutex<MetricsState>,
    backpressure_delay: Duration,
    max_queued_ops: usize,
}

impl RateLimiter {
    /// Create a rate limiter from configuration.
    pub fn new(config: &RateLimitConfig) -> Self {
        debug!(
            queries_per_second = config.queries_per_second,
            writes_per_second = config.writes_per_second,
            admin_per_second = config.admin_per_second,
            "Creating rate limiter"
        );

        Self {
            query: TokenBucket::new(config.queries_per_second, config.queries_per_second),
            write: TokenBucket::new(config.writes_per_second, config.writes_per_second),
            admin: TokenBucket::new(config.admin_per_second, config.admin_per_second),
            metrics: Mutex::new(MetricsState::default()),
            backpressure_delay: config.backpressure_delay(),
            max_queued_ops: config.max_queued_ops,
        }
    }

    fn bucket(&self, class: OperationClass) -> &TokenBucket {
        match class {
            OperationClass::Query => &self.query,
            OperationClass::Write => &self.write,
            OperationClass::Admin => &self.admin,
        }
    }

    fn record_denied(&self, class: OperationClass) {
        {
            let mut state = self.metrics.lock();
            state.metrics.blocked_ops += 1;
            state.metrics.violation_count += 1;
        }
        debug!(class = %class, "Rate limit exceeded");
    }

    /// Try to admit one operation of `class` without waiting.
    pub fn allow(&self, class: OperationClass) -> bool {
        self.metrics.lock().metrics.total_ops += 1;

        let allowed = self.bucket(class).acquire(1.0);
        if allowed {
            trace!(class = %class, "Operation admitted");
        } else {
            self.record_denied(class);
        }
        allowed
    }

    /// Try to admit one operation of `class`, waiting up to `timeout`.
    pub async fn allow_with_wait(&self, class: OperationClass, timeout: Duration) -> bool {
        self.metrics.lock().metrics.total_ops += 1;

        let bucket = self.bucket(class);
        if bucket.acquire(1.0) {
            trace!(class = %class, "Operation admitted");
            return true;
        }

        self.metrics.lock().metrics.throttled_ops += 1;
        let started = Instant::now();

        if bucket.acquire_with_wait(1.0, timeout).await {
            let waited = started.elapsed();
            let mut state = self.metrics.lock();
            state.total_wait += waited;
            state.waits += 1;
            let waits = u32::try_from(state.waits).unwrap_or(u32::MAX);
            state.metrics.avg_wait_time = state.total_wait / waits;
            trace!(class = %class, waited = ?waited, "Operation admitted after waiting");
            true
        } else {
            self.record_denied(class);
            false
        }
    }

    pub fn allow_query(&self) -> bool {
        self.allow(OperationClass::Query)
    }

    pub fn allow_write(&self) -> bool {
        self.allow(OperationClass::Write)
    }

    pub fn allow_admin(&self) -> bool {
        self.allow(OperationClass::Admin)
    }

    pub async fn allow_query_with_wait(&self, timeout: Duration) -> bool {
        self.allow_with_wait(OperationClass::Query, timeout).await
    }

    pub async fn allow_write_with_wait(&self, timeout: Duration) -> bool {
        self.allow_with_wait(OperationClass::Write, timeout).await
    }

    pub async fn allow_admin_with_wait(&self, timeout: Duration) -> bool {
        self.allow_with_wait(OperationClass::Admin, timeout).await
    }

    /// Tokens currently available to `class`.
    pub fn available(&self, class: OperationClass) -> f64 {
        self.bucket(class).peek()
    }

    /// Get a copy of the aggregate counters.
    pub fn metrics(&self) -> RateLimitMetrics {
        self.metrics.lock().metrics.clone()
    }

    /// How long callers should back off after a rejection.
    pub fn backpressure_delay(&self) -> Duration {
        self.backpressure_delay
    }

    /// Advisory queue bound; the limiter itself never queues.
    pub fn max_queued_ops(&self) -> usize {
        self.max_queued_ops
    }

    /// Refill every bucket and zero all metrics.
    pub fn reset(&self) {
        for class in OperationClass::ALL {
            self.bucket(class).reset();
        }
        *self.metrics.lock() = MetricsState::default();
        debug!("Rate limiter reset");
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(&RateLimitConfig::default())
    }
}

impl fmt::Display for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RateLimiter{{query: {:.1}/{:.1}, write: {:.1}/{:.1}, admin: {:.1}/{:.1}, {}}}",
            self.query.peek(),
            self.query.capacity(),
            self.write.peek(),
            self.write.capacity(),
            self.admin.peek(),
            self.admin.capacity(),
            self.metrics()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn config(queries: f64, writes: f64, admin: f64) -> RateLimitConfig {
        RateLimitConfig {
            queries_per_second: queries,
            writes_per_second: writes,
            admin_per_second: admin,
            ..RateLimitConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_allowance_is_one_second() {
        let limiter = RateLimiter::new(&config(5.0, 5.0, 5.0));

        for _ in 0..5 {
            assert!(limiter.allow_query());
        }
        assert!(!limiter.allow_query());

        let metrics = limiter.metrics();
        assert_eq!(metrics.total_ops, 6);
        assert_eq!(metrics.blocked_ops, 1);
        assert_eq!(metrics.violation_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_classes_are_independent() {
        let limiter = RateLimiter::new(&config(10.0, 1.0, 1.0));

        assert!(limiter.allow_write());
        assert!(!limiter.allow_write());

        // Exhausted writes must not affect queries or admin
        assert!(limiter.allow_query());
        assert!(limiter.allow_admin());
        assert!(!limiter.allow_admin());
        assert_eq!(limiter.available(OperationClass::Query), 9.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_admission_bound() {
        let limiter = Arc::new(RateLimiter::new(&config(100.0, 10.0, 10.0)));

        let tasks: Vec<_> = (0..150)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move { limiter.allow_query() })
            })
            .collect();

        let results = futures::future::join_all(tasks).await;
        let admitted = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();

        assert_eq!(admitted, 100);
        let metrics = limiter.metrics();
        assert_eq!(metrics.total_ops, 150);
        assert_eq!(metrics.blocked_ops, 50);
    }

    #[tokio::test(start_paused = true)]
    async fn test_allow_with_wait_tracks_throttling() {
        let limiter = RateLimiter::new(&config(10.0, 10.0, 10.0));
        for _ in 0..10 {
            assert!(limiter.allow_query());
        }

        // One token accrues every 100ms
        assert!(limiter.allow_query_with_wait(Duration::from_millis(500)).await);

        let metrics = limiter.metrics();
        assert_eq!(metrics.total_ops, 11);
        assert_eq!(metrics.throttled_ops, 1);
        assert_eq!(metrics.blocked_ops, 0);
        assert!(metrics.avg_wait_time >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_allow_with_wait_times_out() {
        let limiter = RateLimiter::new(&config(1.0, 1.0, 1.0));
        assert!(limiter.allow_admin());

        let start = Instant::now();
        assert!(!limiter.allow_admin_with_wait(Duration::from_millis(200)).await);
        assert!(start.elapsed() <= Duration::from_millis(201));

        let metrics = limiter.metrics();
        assert_eq!(metrics.throttled_ops, 1);
        assert_eq!(metrics.blocked_ops, 1);
        assert_eq!(metrics.avg_wait_time, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_allow_with_wait_immediate_is_not_throttled() {
        let limiter = RateLimiter::default();
        assert!(limiter.allow_write_with_wait(Duration::from_millis(10)).await);
        assert_eq!(limiter.metrics().throttled_ops, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_metrics_snapshot_is_a_copy() {
        let limiter = RateLimiter::new(&config(1.0, 1.0, 1.0));
        let before = limiter.metrics();
        limiter.allow_query();
        limiter.allow_query();

        assert_eq!(before.total_ops, 0);
        assert_eq!(limiter.metrics().total_ops, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_buckets_and_metrics() {
        let limiter = RateLimiter::new(&config(2.0, 2.0, 2.0));
        limiter.allow_query();
        limiter.allow_query();
        assert!(!limiter.allow_query());

        limiter.reset();
        assert_eq!(limiter.metrics(), RateLimitMetrics::default());
        assert_eq!(limiter.available(OperationClass::Query), 2.0);
        assert!(limiter.allow_query());
    }

    #[test]
    fn test_display_includes_buckets_and_metrics() {
        let limiter = RateLimiter::new(&config(4.0, 2.0, 1.0));
        let rendered = limiter.to_string();
        assert!(rendered.starts_with("RateLimiter{query: 4.0/4.0"));
        assert!(rendered.contains("total=0"));
    }

    #[test]
    fn test_operation_class_from_str() {
        assert_eq!("Query".parse::<OperationClass>(), Ok(OperationClass::Query));
        assert_eq!("admin".parse::<OperationClass>(), Ok(OperationClass::Admin));
        assert!("ddl".parse::<OperationClass>().is_err());
    }
}
