//! Deadline-bound execution scopes.
//!
//! A scope combines a cancellation token with an optional absolute deadline.
//! Scopes are derived from a parent: the child's deadline never outlives the
//! parent's, and cancelling a parent cancels every descendant while the
//! reverse never happens.

use std::future::Future;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tokio::time::{sleep_until, Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Why a scope finished before its work did.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeError {
    #[error("operation timeout: deadline exceeded")]
    DeadlineExceeded,
    #[error("context canceled: operation failed before completion")]
    Canceled,
}

#[derive(Debug)]
struct ScopeState {
    deadline: Option<Instant>,
    /// First observed reason the scope ended; later causes never overwrite it
    cause: OnceLock<ScopeError>,
}

impl ScopeState {
    fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    fn latch(&self, token: &CancellationToken) -> Option<ScopeError> {
        if let Some(cause) = self.cause.get() {
            return Some(*cause);
        }
        if self.deadline_passed() {
            return Some(*self.cause.get_or_init(|| ScopeError::DeadlineExceeded));
        }
        if token.is_cancelled() {
            return Some(*self.cause.get_or_init(|| ScopeError::Canceled));
        }
        None
    }
}

/// An execution scope that ends at its deadline or when cancelled.
#[derive(Debug, Clone)]
pub struct DeadlineScope {
    token: CancellationToken,
    state: Arc<ScopeState>,
}

impl DeadlineScope {
    /// The root scope: no deadline, never cancelled.
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            state: Arc::new(ScopeState {
                deadline: None,
                cause: OnceLock::new(),
            }),
        }
    }

    /// Derive a child scope ending `timeout` from now, or at this scope's
    /// deadline if that comes first.
    ///
    /// The returned [`ScopeRelease`] must be kept alive for as long as the
    /// child is in use; releasing or dropping it ends the child.
    pub fn with_timeout(&self, timeout: Duration) -> (DeadlineScope, ScopeRelease) {
        let own = Instant::now().checked_add(timeout);
        let deadline = match (self.state.deadline, own) {
            (Some(parent), Some(own)) => Some(parent.min(own)),
            (Some(parent), None) => Some(parent),
            (None, own) => own,
        };

        let state = Arc::new(ScopeState {
            deadline,
            cause: OnceLock::new(),
        });
        let token = self.token.child_token();

        let scope = DeadlineScope {
            token: token.clone(),
            state: Arc::clone(&state),
        };
        (scope, ScopeRelease { token, state })
    }

    /// The absolute deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.state.deadline
    }

    /// Time left before the deadline; `None` for scopes without one.
    pub fn remaining(&self) -> Option<Duration> {
        self.state
            .deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Why the scope ended, or `None` while it is still live.
    pub fn err(&self) -> Option<ScopeError> {
        self.state.latch(&self.token)
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Resolve once the scope ends.
    pub async fn done(&self) -> ScopeError {
        match self.state.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
        self.err().unwrap_or(ScopeError::Canceled)
    }

    /// Run `future` inside this scope.
    ///
    /// The future is dropped if the scope ends first. Work that completes in
    /// the same poll as the deadline is kept.
    pub async fn run<F>(&self, future: F) -> Result<F::Output, ScopeError>
    where
        F: Future,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }

        tokio::select! {
            biased;
            output = future => Ok(output),
            err = self.done() => Err(err),
        }
    }
}

/// Ends a derived scope and frees its resources.
///
/// Releasing is idempotent. Dropping the handle releases it, so every exit
/// path ends the scope exactly once.
#[derive(Debug)]
#[must_use = "dropping the release handle ends the scope immediately"]
pub struct ScopeRelease {
    token: CancellationToken,
    state: Arc<ScopeState>,
}

impl ScopeRelease {
    pub fn release(&self) {
        if self.token.is_cancelled() {
            return;
        }
        // A release after the deadline keeps the deadline as the cause
        if !self.state.deadline_passed() {
            let _ = self.state.cause.set(ScopeError::Canceled);
        }
        self.token.cancel();
    }

    pub fn is_released(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for ScopeRelease {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    #[tokio::test(start_paused = true)]
    async fn test_background_never_ends() {
        let scope = DeadlineScope::background();
        assert!(scope.deadline().is_none());
        assert!(scope.remaining().is_none());

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(!scope.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires() {
        let root = DeadlineScope::background();
        let (scope, _release) = root.with_timeout(Duration::from_secs(2));

        assert_eq!(scope.remaining(), Some(Duration::from_secs(2)));
        assert!(scope.err().is_none());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(scope.err(), Some(ScopeError::DeadlineExceeded));
        assert_eq!(scope.remaining(), Some(Duration::ZERO));
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_is_idempotent() {
        let root = DeadlineScope::background();
        let (scope, release) = root.with_timeout(Duration::from_secs(10));

        release.release();
        assert!(release.is_released());
        assert_eq!(scope.err(), Some(ScopeError::Canceled));

        release.release();
        assert_eq!(scope.err(), Some(ScopeError::Canceled));

        // The cause is latched even once the deadline passes
        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(scope.err(), Some(ScopeError::Canceled));
        assert!(!root.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_releases() {
        let root = DeadlineScope::background();
        let (scope, release) = root.with_timeout(Duration::from_secs(10));
        drop(release);
        assert_eq!(scope.err(), Some(ScopeError::Canceled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_deadline_bounded_by_parent() {
        let root = DeadlineScope::background();
        let (parent, _parent_release) = root.with_timeout(Duration::from_secs(1));
        let (child, _child_release) = parent.with_timeout(Duration::from_secs(30));

        assert_eq!(child.deadline(), parent.deadline());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(child.err(), Some(ScopeError::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_propagates_downward_only() {
        let root = DeadlineScope::background();
        let (parent, parent_release) = root.with_timeout(Duration::from_secs(30));
        let (child, child_release) = parent.with_timeout(Duration::from_secs(30));

        child_release.release();
        assert!(child.is_done());
        assert!(!parent.is_done());

        let (other_child, _other_release) = parent.with_timeout(Duration::from_secs(30));
        parent_release.release();
        assert_eq!(other_child.err(), Some(ScopeError::Canceled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_done_wakes_on_release() {
        let root = DeadlineScope::background();
        let (scope, release) = root.with_timeout(Duration::from_secs(30));

        let mut done = task::spawn(scope.done());
        assert_pending!(done.poll());

        release.release();
        assert!(done.is_woken());
        assert_ready_eq!(done.poll(), ScopeError::Canceled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_completes_within_deadline() {
        let root = DeadlineScope::background();
        let (scope, _release) = root.with_timeout(Duration::from_secs(1));

        let result = scope
            .run(async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                42
            })
            .await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_at_deadline() {
        let root = DeadlineScope::background();
        let (scope, _release) = root.with_timeout(Duration::from_millis(100));

        let start = Instant::now();
        let result = scope
            .run(tokio::time::sleep(Duration::from_secs(10)))
            .await;
        assert_eq!(result, Err(ScopeError::DeadlineExceeded));
        assert_eq!(start.elapsed(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_on_ended_scope_short_circuits() {
        let root = DeadlineScope::background();
        let (scope, release) = root.with_timeout(Duration::from_secs(1));
        release.release();

        let result = scope.run(async { 1 }).await;
        assert_eq!(result, Err(ScopeError::Canceled));
    }
}
