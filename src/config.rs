//! Configuration management for dbguard.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{GuardError, Result};
use crate::timeout::TimeoutProfile;

/// Prefix for environment variable overrides, e.g. `DBGUARD_RATE_LIMIT__QUERIES_PER_SECOND`.
pub const ENV_PREFIX: &str = "DBGUARD";

/// Timeouts above this are accepted but reported.
pub const EXCESSIVE_TIMEOUT: Duration = Duration::from_secs(3600);

/// Main configuration for dbguard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Admission control configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Per-profile deadline configuration
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Audit configuration
    #[serde(default)]
    pub audit: AuditConfig,
}

/// Admission control configuration.
///
/// Each class gets a bucket whose capacity equals its per-second rate, so the
/// default burst allowance is one second of traffic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Read queries admitted per second
    #[serde(default = "default_queries_per_second")]
    pub queries_per_second: f64,

    /// Writes admitted per second
    #[serde(default = "default_writes_per_second")]
    pub writes_per_second: f64,

    /// Admin/DDL operations admitted per second
    #[serde(default = "default_admin_per_second")]
    pub admin_per_second: f64,

    /// How long a caller should back off before retrying a rejected operation
    #[serde(default = "default_backpressure_delay")]
    pub backpressure_delay_ms: u64,

    /// Advisory bound on queued operations; enforcing it is up to the caller
    #[serde(default = "default_max_queued_ops")]
    pub max_queued_ops: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            queries_per_second: default_queries_per_second(),
            writes_per_second: default_writes_per_second(),
            admin_per_second: default_admin_per_second(),
            backpressure_delay_ms: default_backpressure_delay(),
            max_queued_ops: default_max_queued_ops(),
        }
    }
}

impl RateLimitConfig {
    /// Get the backpressure delay as a duration.
    pub fn backpressure_delay(&self) -> Duration {
        Duration::from_millis(self.backpressure_delay_ms)
    }
}

fn default_queries_per_second() -> f64 {
    100.0
}

fn default_writes_per_second() -> f64 {
    50.0
}

fn default_admin_per_second() -> f64 {
    10.0
}

fn default_backpressure_delay() -> u64 {
    100
}

fn default_max_queued_ops() -> usize {
    1000
}

/// Deadline durations per timeout profile, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_default_timeout")]
    pub default_ms: u64,

    #[serde(default = "default_query_timeout")]
    pub query_ms: u64,

    #[serde(default = "default_long_query_timeout")]
    pub long_query_ms: u64,

    /// Writes hold locks, so they get more time than reads
    #[serde(default = "default_write_timeout")]
    pub write_ms: u64,

    /// DDL should fail fast under lock contention
    #[serde(default = "default_admin_timeout")]
    pub admin_ms: u64,

    #[serde(default = "default_connection_timeout")]
    pub connection_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_ms: default_default_timeout(),
            query_ms: default_query_timeout(),
            long_query_ms: default_long_query_timeout(),
            write_ms: default_write_timeout(),
            admin_ms: default_admin_timeout(),
            connection_ms: default_connection_timeout(),
        }
    }
}

impl TimeoutConfig {
    /// Get the configured duration for a profile.
    pub fn get(&self, profile: TimeoutProfile) -> Duration {
        let ms = match profile {
            TimeoutProfile::Default => self.default_ms,
            TimeoutProfile::Query => self.query_ms,
            TimeoutProfile::LongQuery => self.long_query_ms,
            TimeoutProfile::Write => self.write_ms,
            TimeoutProfile::Admin => self.admin_ms,
            TimeoutProfile::Connection => self.connection_ms,
        };
        Duration::from_millis(ms)
    }

    /// Set the duration for a profile, saturating at `u64::MAX` milliseconds.
    pub fn set(&mut self, profile: TimeoutProfile, duration: Duration) {
        let ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        let slot = match profile {
            TimeoutProfile::Default => &mut self.default_ms,
            TimeoutProfile::Query => &mut self.query_ms,
            TimeoutProfile::LongQuery => &mut self.long_query_ms,
            TimeoutProfile::Write => &mut self.write_ms,
            TimeoutProfile::Admin => &mut self.admin_ms,
            TimeoutProfile::Connection => &mut self.connection_ms,
        };
        *slot = ms;
    }
}

fn default_default_timeout() -> u64 {
    30_000
}

fn default_query_timeout() -> u64 {
    30_000
}

fn default_long_query_timeout() -> u64 {
    300_000
}

fn default_write_timeout() -> u64 {
    60_000
}

fn default_admin_timeout() -> u64 {
    15_000
}

fn default_connection_timeout() -> u64 {
    5_000
}

/// Audit configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Source label stamped on audit events
    #[serde(default = "default_audit_source")]
    pub source: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            source: default_audit_source(),
        }
    }
}

fn default_audit_source() -> String {
    "dbguard".to_string()
}

impl GuardConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: GuardConfig = serde_yaml::from_str(yaml)
            .map_err(|e| GuardError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load layered configuration: defaults, then an optional file, then
    /// `DBGUARD_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(config::File::from(path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: GuardConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check rates and timeouts for values that cannot work.
    pub fn validate(&self) -> Result<()> {
        let rates = [
            ("queries_per_second", self.rate_limit.queries_per_second),
            ("writes_per_second", self.rate_limit.writes_per_second),
            ("admin_per_second", self.rate_limit.admin_per_second),
        ];
        for (name, rate) in rates {
            if !rate.is_finite() || rate <= 0.0 {
                return Err(GuardError::Config(format!(
                    "{} must be a positive number, got {}",
                    name, rate
                )));
            }
        }

        for profile in TimeoutProfile::ALL {
            let timeout = self.timeouts.get(profile);
            if timeout.is_zero() {
                return Err(GuardError::Config(format!(
                    "timeout for profile {} must be greater than zero",
                    profile
                )));
            }
            if timeout > EXCESSIVE_TIMEOUT {
                warn!(profile = %profile, timeout = ?timeout, "Configured timeout is unusually large");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Serializes tests that read or write `DBGUARD_*` variables.
    static ENV_LOCK: parking_lot::Mutex<()> = parking_lot::Mutex::new(());

    #[test]
    fn test_defaults() {
        let config = GuardConfig::default();
        assert_eq!(config.rate_limit.queries_per_second, 100.0);
        assert_eq!(config.rate_limit.backpressure_delay(), Duration::from_millis(100));
        assert_eq!(config.timeouts.get(TimeoutProfile::Default), Duration::from_secs(30));
        assert_eq!(config.timeouts.get(TimeoutProfile::Query), Duration::from_secs(30));
        assert_eq!(config.timeouts.get(TimeoutProfile::LongQuery), Duration::from_secs(300));
        assert_eq!(config.timeouts.get(TimeoutProfile::Write), Duration::from_secs(60));
        assert_eq!(config.timeouts.get(TimeoutProfile::Admin), Duration::from_secs(15));
        assert_eq!(config.timeouts.get(TimeoutProfile::Connection), Duration::from_secs(5));
        assert_eq!(config.audit.source, "dbguard");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
rate_limit:
  queries_per_second: 5
timeouts:
  admin_ms: 2000
"#;
        let config = GuardConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.rate_limit.queries_per_second, 5.0);
        assert_eq!(config.rate_limit.writes_per_second, 50.0);
        assert_eq!(config.timeouts.get(TimeoutProfile::Admin), Duration::from_secs(2));
        assert_eq!(config.timeouts.get(TimeoutProfile::Write), Duration::from_secs(60));
    }

    #[test]
    fn test_rejects_zero_rate() {
        let yaml = r#"
rate_limit:
  writes_per_second: 0
"#;
        let err = GuardConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, GuardError::Config(_)));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let yaml = r#"
timeouts:
  connection_ms: 0
"#;
        assert!(GuardConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_timeout_set_roundtrip() {
        let mut timeouts = TimeoutConfig::default();
        timeouts.set(TimeoutProfile::Query, Duration::from_millis(1500));
        assert_eq!(timeouts.get(TimeoutProfile::Query), Duration::from_millis(1500));
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let _guard = ENV_LOCK.lock();
        let config = GuardConfig::load(None).unwrap();
        assert_eq!(config.timeouts, TimeoutConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let _guard = ENV_LOCK.lock();
        let path = std::env::temp_dir().join(format!("dbguard-{}.yaml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "rate_limit:\n  admin_per_second: 3\n").unwrap();

        let config = GuardConfig::load(Some(&path)).unwrap();
        assert_eq!(config.rate_limit.admin_per_second, 3.0);
        assert_eq!(config.rate_limit.queries_per_second, 100.0);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_load_env_overrides() {
        let _guard = ENV_LOCK.lock();
        std::env::set_var("DBGUARD_RATE_LIMIT__QUERIES_PER_SECOND", "5");
        std::env::set_var("DBGUARD_TIMEOUTS__ADMIN_MS", "2000");

        let result = GuardConfig::load(None);

        std::env::remove_var("DBGUARD_RATE_LIMIT__QUERIES_PER_SECOND");
        std::env::remove_var("DBGUARD_TIMEOUTS__ADMIN_MS");

        let config = result.unwrap();
        assert_eq!(config.rate_limit.queries_per_second, 5.0);
        assert_eq!(config.rate_limit.writes_per_second, 50.0);
        assert_eq!(config.timeouts.get(TimeoutProfile::Admin), Duration::from_secs(2));
        assert_eq!(config.timeouts.get(TimeoutProfile::Query), Duration::from_secs(30));
    }
}
