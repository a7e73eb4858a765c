//! Continuously refilling token bucket.

use parking_lot::Mutex;
use tokio::time::{sleep, Duration, Instant};
use tracing::trace;

/// Lower bound on how long a waiting acquire sleeps between attempts.
pub const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Upper bound applied to wait timeouts that would overflow the clock.
const MAX_WAIT: Duration = Duration::from_secs(86400 * 365);

/// Mutable bucket state, always read and written under one lock.
#[derive(Debug)]
struct BucketState {
    /// Token level as of `last_refill`
    tokens: f64,
    /// When `tokens` was last brought up to date
    last_refill: Instant,
}

/// A token bucket bounding throughput for one operation class.
///
/// Tokens accrue continuously at `refill_rate` per second up to `capacity`.
/// The level is recomputed from elapsed time before every read or decrement,
/// so it never exceeds `capacity` and never goes negative. Buckets start full.
#[derive(Debug)]
pub struct TokenBucket {
    /// Maximum number of tokens the bucket can hold
    capacity: f64,
    /// Tokens added per second
    refill_rate: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(capacity: f64, refill_rate: f64) -> Self {
        let capacity = capacity.max(0.0);
        Self {
            capacity,
            refill_rate: refill_rate.max(0.0),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Get the bucket capacity.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Get the refill rate in tokens per second.
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    fn level_at(&self, state: &BucketState, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        (state.tokens + elapsed * self.refill_rate).min(self.capacity)
    }

    /// Try to take `count` tokens without blocking.
    ///
    /// Refill and decrement happen under the same lock. Returns `false` and
    /// leaves the level untouched when fewer than `count` tokens are available.
    pub fn acquire(&self, count: f64) -> bool {
        if count.is_nan() || count < 0.0 {
            return false;
        }

        let mut state = self.state.lock();
        let now = Instant::now();
        state.tokens = self.level_at(&state, now);
        state.last_refill = now;

        if state.tokens >= count {
            state.tokens -= count;
            trace!(count, remaining = state.tokens, "Tokens acquired");
            true
        } else {
            false
        }
    }

    /// Take `count` tokens, waiting up to `timeout` for them to accrue.
    ///
    /// Between attempts the caller sleeps for the time the deficit needs to
    /// refill, never less than [`POLL_INTERVAL`] and never past the deadline.
    /// Always returns by the deadline. Requests larger than the capacity can
    /// never succeed and fail immediately.
    pub async fn acquire_with_wait(&self, count: f64, timeout: Duration) -> bool {
        if count.is_nan() || count < 0.0 || count > self.capacity {
            return false;
        }

        let now = Instant::now();
        let deadline = now.checked_add(timeout).unwrap_or(now + MAX_WAIT);
        loop {
            if self.acquire(count) {
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }

            let wait = self.time_until_available(count).max(POLL_INTERVAL);
            sleep(wait.min(deadline - now)).await;
        }
    }

    /// Estimate how long until `count` tokens are available.
    ///
    /// With a zero refill rate the estimate is the poll interval, since only
    /// a [`reset`](Self::reset) can replenish the bucket.
    pub fn time_until_available(&self, count: f64) -> Duration {
        let deficit = count - self.peek();
        if !(deficit > 0.0) {
            return Duration::ZERO;
        }
        if self.refill_rate <= 0.0 {
            return POLL_INTERVAL;
        }
        Duration::try_from_secs_f64(deficit / self.refill_rate).unwrap_or(Duration::MAX)
    }

    /// The level a refill at this instant would produce, without committing it.
    pub fn peek(&self) -> f64 {
        let state = self.state.lock();
        self.level_at(&state, Instant::now())
    }

    /// Refill to capacity and restart the refill clock.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.tokens = self.capacity;
        state.last_refill = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_acquire_conserves_tokens() {
        let bucket = TokenBucket::new(10.0, 10.0);

        assert!(bucket.acquire(5.0));
        assert_eq!(bucket.peek(), 5.0);

        // Not enough left, level must not move
        assert!(!bucket.acquire(6.0));
        assert_eq!(bucket.peek(), 5.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_is_continuous_and_capped() {
        let bucket = TokenBucket::new(10.0, 10.0);
        assert!(bucket.acquire(10.0));
        assert_eq!(bucket.peek(), 0.0);

        tokio::time::advance(Duration::from_millis(500)).await;
        let level = bucket.peek();
        assert!((level - 5.0).abs() < 0.01, "expected ~5 tokens, got {}", level);

        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(bucket.peek(), 10.0);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(bucket.peek(), 10.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_peek_does_not_commit() {
        let bucket = TokenBucket::new(10.0, 10.0);
        assert!(bucket.acquire(10.0));

        tokio::time::advance(Duration::from_millis(300)).await;
        let peeked = bucket.peek();
        assert!(bucket.acquire(peeked));
        assert_eq!(bucket.peek(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_restores_capacity() {
        let bucket = TokenBucket::new(4.0, 1.0);
        assert!(bucket.acquire(4.0));
        bucket.reset();
        assert_eq!(bucket.peek(), 4.0);
    }

    #[test]
    fn test_rejects_negative_count() {
        let bucket = TokenBucket::new(4.0, 1.0);
        assert!(!bucket.acquire(-1.0));
        assert!(!bucket.acquire(f64::NAN));
        assert!(bucket.acquire(0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_with_wait_succeeds_after_refill() {
        let bucket = TokenBucket::new(2.0, 10.0);
        assert!(bucket.acquire(2.0));

        let start = Instant::now();
        assert!(bucket.acquire_with_wait(1.0, Duration::from_secs(1)).await);
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(100));
        assert!(waited < Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_with_wait_returns_by_deadline() {
        let bucket = TokenBucket::new(5.0, 1.0);
        assert!(bucket.acquire(5.0));

        let start = Instant::now();
        assert!(!bucket.acquire_with_wait(3.0, Duration::from_millis(200)).await);
        assert!(start.elapsed() <= Duration::from_millis(201));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_with_wait_over_capacity_fails_fast() {
        let bucket = TokenBucket::new(5.0, 1.0);
        let start = Instant::now();
        assert!(!bucket.acquire_with_wait(6.0, Duration::from_secs(10)).await);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_concurrent_acquire_grants_exactly_capacity() {
        // Refill is negligible for the duration of the test
        let bucket = Arc::new(TokenBucket::new(100.0, 0.001));
        let granted = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let bucket = Arc::clone(&bucket);
                let granted = Arc::clone(&granted);
                std::thread::spawn(move || {
                    for _ in 0..20 {
                        if bucket.acquire(1.0) {
                            granted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(granted.load(Ordering::SeqCst), 100);
        let level = bucket.peek();
        assert!((0.0..1.0).contains(&level));
    }
}
