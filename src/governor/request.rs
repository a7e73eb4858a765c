//! Requests, results and the executor seam for governed operations.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;

use crate::audit::Operation;
use crate::ratelimit::OperationClass;
use crate::sanitize::{ClientResponse, ErrorCategory, SanitizedError};
use crate::severity::Severity;
use crate::timeout::{DeadlineScope, TimeoutProfile};

/// Raw failure returned by an executor, before sanitization.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Metadata describing one operation to govern.
#[derive(Debug, Clone)]
pub struct OperationRequest {
    pub class: OperationClass,
    pub operation: Operation,
    /// Overrides the class's default timeout profile
    pub profile: Option<TimeoutProfile>,
    pub user: String,
    pub database: String,
    pub table: Option<String>,
    pub query: Option<String>,
    pub ip_address: Option<String>,
}

impl OperationRequest {
    pub fn new(class: OperationClass) -> Self {
        Self {
            class,
            operation: Operation::Other,
            profile: None,
            user: String::new(),
            database: String::new(),
            table: None,
            query: None,
            ip_address: None,
        }
    }

    /// A request for `query`, with the operation detected from its text.
    pub fn for_query(class: OperationClass, query: impl Into<String>) -> Self {
        let query = query.into();
        let mut request = Self::new(class);
        request.operation = Operation::from_query(&query);
        request.query = Some(query);
        request
    }

    pub fn with_profile(mut self, profile: TimeoutProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn with_ip_address(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    /// The timeout profile this request runs under.
    pub fn timeout_profile(&self) -> TimeoutProfile {
        self.profile.unwrap_or_else(|| self.class.into())
    }
}

/// What a successful execution reports back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub rows_affected: u64,
}

/// Runs the underlying database operation.
///
/// Implementations should watch `scope` for long-running work; the governor
/// drops the returned future once the scope ends either way.
#[async_trait]
pub trait OperationExecutor: Send + Sync {
    async fn execute(
        &self,
        scope: &DeadlineScope,
        request: &OperationRequest,
    ) -> Result<ExecutionResult, BoxError>;
}

/// Why a governed operation did not produce a result.
#[derive(Debug, Clone)]
pub enum Rejection {
    /// Not admitted; the caller decides whether to back off and retry
    RateLimited { class: OperationClass },
    /// Executed and failed, or ran out of time
    Failed(SanitizedError),
}

impl Rejection {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Rejection::RateLimited { .. })
    }

    pub fn error(&self) -> Option<&SanitizedError> {
        match self {
            Rejection::Failed(error) => Some(error),
            Rejection::RateLimited { .. } => None,
        }
    }

    /// Flat client-facing body for either outcome.
    pub fn client_response(&self) -> ClientResponse {
        match self {
            Rejection::Failed(error) => error.client_response(),
            Rejection::RateLimited { class } => ClientResponse {
                error: "ERR_RATE_LIMITED".to_string(),
                message: format!("too many {} operations, retry later", class),
                category: ErrorCategory::System,
                severity: Severity::Warning,
                retryable: true,
                details: Default::default(),
            },
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::RateLimited { class } => write!(f, "{} operation rate limited", class),
            Rejection::Failed(error) => write!(f, "{}", error),
        }
    }
}

impl std::error::Error for Rejection {}
