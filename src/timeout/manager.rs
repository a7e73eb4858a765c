//! Per-profile deadline management and call timing.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::time::{Duration, Instant};
use tracing::{debug, warn};

use super::profile::TimeoutProfile;
use super::scope::{DeadlineScope, ScopeRelease};
use crate::config::{TimeoutConfig, EXCESSIVE_TIMEOUT};
use crate::error::{GuardError, Result};

/// Remaining time below which a call counts as near its deadline.
pub const NEAR_DEADLINE_THRESHOLD: Duration = Duration::from_secs(1);

/// Outcome of [`TimeoutManager::validate_duration`] for an accepted duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationCheck {
    Ok,
    /// Usable, but longer than [`EXCESSIVE_TIMEOUT`]
    Excessive,
}

/// Timing record for one governed call.
///
/// Created when the call starts and finalized once, when it completes or is
/// cancelled.
#[derive(Debug, Clone, Serialize)]
pub struct TimeoutDetails {
    pub profile: TimeoutProfile,
    pub timeout: Duration,
    pub started_at: DateTime<Utc>,
    #[serde(skip)]
    start: Instant,
    elapsed: Option<Duration>,
    is_timeout: bool,
}

impl TimeoutDetails {
    fn new(profile: TimeoutProfile, timeout: Duration) -> Self {
        Self {
            profile,
            timeout,
            started_at: Utc::now(),
            start: Instant::now(),
            elapsed: None,
            is_timeout: false,
        }
    }

    /// Elapsed time, fixed at completion and live before it.
    pub fn elapsed(&self) -> Duration {
        self.elapsed.unwrap_or_else(|| self.start.elapsed())
    }

    /// Time left before the configured timeout.
    pub fn remaining_time(&self) -> Duration {
        self.timeout.saturating_sub(self.elapsed())
    }

    pub fn is_timeout(&self) -> bool {
        self.is_timeout
    }

    pub fn is_completed(&self) -> bool {
        self.elapsed.is_some()
    }
}

/// Maps timeout profiles to deadlines and tracks call timing.
pub struct TimeoutManager {
    config: RwLock<TimeoutConfig>,
}

impl TimeoutManager {
    pub fn new(config: TimeoutConfig) -> Self {
        Self {
            config: RwLock::new(config),
        }
    }

    /// Get the configured timeout for a profile.
    pub fn timeout_for(&self, profile: TimeoutProfile) -> Duration {
        self.config.read().get(profile)
    }

    /// Change the timeout for a profile.
    ///
    /// Zero durations are rejected; excessive ones are accepted with a warning.
    pub fn set_timeout(&self, profile: TimeoutProfile, timeout: Duration) -> Result<DurationCheck> {
        let check = Self::validate_duration(timeout)?;
        self.config.write().set(profile, timeout);
        debug!(profile = %profile, timeout = ?timeout, "Timeout updated");
        Ok(check)
    }

    /// Get a copy of the current configuration.
    pub fn config(&self) -> TimeoutConfig {
        self.config.read().clone()
    }

    /// Derive a scope from `parent` whose deadline is now plus the profile's timeout.
    pub fn timeout_context(
        &self,
        parent: &DeadlineScope,
        profile: TimeoutProfile,
    ) -> (DeadlineScope, ScopeRelease) {
        let timeout = self.timeout_for(profile);
        debug!(profile = %profile, timeout = ?timeout, "Creating deadline scope");
        parent.with_timeout(timeout)
    }

    /// Start timing a call under `profile`.
    pub fn start(&self, profile: TimeoutProfile) -> TimeoutDetails {
        TimeoutDetails::new(profile, self.timeout_for(profile))
    }

    /// Finalize a timing record.
    ///
    /// Only the first call has an effect; returns whether this call recorded.
    pub fn record_completion(&self, details: &mut TimeoutDetails, is_timeout: bool) -> bool {
        if details.elapsed.is_some() {
            warn!(profile = %details.profile, "Timeout details already completed");
            return false;
        }

        let elapsed = details.start.elapsed();
        details.elapsed = Some(elapsed);
        details.is_timeout = is_timeout;

        if is_timeout {
            warn!(
                profile = %details.profile,
                timeout = ?details.timeout,
                elapsed = ?elapsed,
                "Operation timed out"
            );
        }
        true
    }

    /// Whether less than [`NEAR_DEADLINE_THRESHOLD`] remains.
    pub fn is_near_deadline(&self, details: &TimeoutDetails) -> bool {
        details.remaining_time() < NEAR_DEADLINE_THRESHOLD
    }

    /// Reject durations that cannot serve as a deadline and flag very long ones.
    pub fn validate_duration(duration: Duration) -> Result<DurationCheck> {
        if duration.is_zero() {
            return Err(GuardError::InvalidDuration(
                "timeout must be greater than zero".to_string(),
            ));
        }
        if duration > EXCESSIVE_TIMEOUT {
            warn!(timeout = ?duration, "Timeout exceeds one hour");
            return Ok(DurationCheck::Excessive);
        }
        Ok(DurationCheck::Ok)
    }
}

impl Default for TimeoutManager {
    fn default() -> Self {
        Self::new(TimeoutConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeout::ScopeError;

    #[test]
    fn test_default_profiles() {
        let manager = TimeoutManager::default();
        assert_eq!(manager.timeout_for(TimeoutProfile::Default), Duration::from_secs(30));
        assert_eq!(manager.timeout_for(TimeoutProfile::LongQuery), Duration::from_secs(300));
        assert_eq!(manager.timeout_for(TimeoutProfile::Write), Duration::from_secs(60));
        assert_eq!(manager.timeout_for(TimeoutProfile::Admin), Duration::from_secs(15));
        assert_eq!(manager.timeout_for(TimeoutProfile::Connection), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_context_uses_profile() {
        let manager = TimeoutManager::default();
        let root = DeadlineScope::background();

        let (scope, release) = manager.timeout_context(&root, TimeoutProfile::Admin);
        assert_eq!(scope.remaining(), Some(Duration::from_secs(15)));

        tokio::time::advance(Duration::from_secs(15)).await;
        assert_eq!(scope.err(), Some(ScopeError::DeadlineExceeded));

        release.release();
        release.release();
        assert_eq!(scope.err(), Some(ScopeError::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_completion_once() {
        let manager = TimeoutManager::default();
        let mut details = manager.start(TimeoutProfile::Query);
        assert!(!details.is_completed());

        tokio::time::advance(Duration::from_millis(250)).await;
        assert!(manager.record_completion(&mut details, false));
        assert_eq!(details.elapsed(), Duration::from_millis(250));
        assert!(!details.is_timeout());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!manager.record_completion(&mut details, true));
        assert_eq!(details.elapsed(), Duration::from_millis(250));
        assert!(!details.is_timeout());
        assert_eq!(details.remaining_time(), Duration::from_millis(29_750));
    }

    #[tokio::test(start_paused = true)]
    async fn test_near_deadline() {
        let manager = TimeoutManager::default();
        let mut details = manager.start(TimeoutProfile::Connection);
        assert!(!manager.is_near_deadline(&details));

        tokio::time::advance(Duration::from_millis(4_200)).await;
        assert!(manager.is_near_deadline(&details));

        manager.record_completion(&mut details, true);
        assert!(details.is_timeout());
        assert!(manager.is_near_deadline(&details));
    }

    #[test]
    fn test_validate_duration() {
        assert!(TimeoutManager::validate_duration(Duration::ZERO).is_err());
        assert_eq!(
            TimeoutManager::validate_duration(Duration::from_secs(10)).unwrap(),
            DurationCheck::Ok
        );
        assert_eq!(
            TimeoutManager::validate_duration(Duration::from_secs(7200)).unwrap(),
            DurationCheck::Excessive
        );
    }

    #[test]
    fn test_set_timeout_validates() {
        let manager = TimeoutManager::default();
        assert!(manager.set_timeout(TimeoutProfile::Query, Duration::ZERO).is_err());
        assert_eq!(manager.timeout_for(TimeoutProfile::Query), Duration::from_secs(30));

        manager.set_timeout(TimeoutProfile::Query, Duration::from_secs(3)).unwrap();
        assert_eq!(manager.timeout_for(TimeoutProfile::Query), Duration::from_secs(3));
        assert_eq!(manager.config().query_ms, 3000);
    }
}
