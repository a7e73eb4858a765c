//! Error types for dbguard.

use thiserror::Error;

/// Main error type for dbguard operations.
#[derive(Error, Debug)]
pub enum GuardError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A timeout duration that cannot be used as a deadline
    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    /// Audit sink failures
    #[error("Audit error: {0}")]
    Audit(String),

    /// Layered configuration source errors
    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for dbguard operations.
pub type Result<T> = std::result::Result<T, GuardError>;
