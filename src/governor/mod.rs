//! The governance pipeline.
//!
//! Composes the independent components in the documented order:
//! admission check, deadline-bound execution, error classification, audit
//! emission. Every governed call produces exactly one audit event.

mod request;

pub use request::{BoxError, ExecutionResult, OperationExecutor, OperationRequest, Rejection};

use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::audit::{
    AuditContext, AuditEvent, AuditEventBuilder, EventType, STATUS_RATE_LIMITED, STATUS_SUCCESS,
};
use crate::config::GuardConfig;
use crate::ratelimit::{OperationClass, RateLimiter};
use crate::sanitize::sanitize_error;
use crate::severity::Severity;
use crate::timeout::{DeadlineScope, ScopeError, TimeoutDetails, TimeoutManager};

/// Gates database operations through admission, deadlines, error
/// containment and auditing.
pub struct Governor {
    limiter: Arc<RateLimiter>,
    timeouts: Arc<TimeoutManager>,
    audit: AuditContext,
    source: String,
}

impl Governor {
    /// Create a governor from configuration.
    pub fn new(config: &GuardConfig, audit: AuditContext) -> Self {
        Self::from_parts(
            Arc::new(RateLimiter::new(&config.rate_limit)),
            Arc::new(TimeoutManager::new(config.timeouts.clone())),
            audit,
            config.audit.source.clone(),
        )
    }

    /// Create a governor around existing components.
    pub fn from_parts(
        limiter: Arc<RateLimiter>,
        timeouts: Arc<TimeoutManager>,
        audit: AuditContext,
        source: impl Into<String>,
    ) -> Self {
        Self {
            limiter,
            timeouts,
            audit,
            source: source.into(),
        }
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn timeouts(&self) -> &Arc<TimeoutManager> {
        &self.timeouts
    }

    pub fn audit(&self) -> &AuditContext {
        &self.audit
    }

    /// Run one operation under governance.
    ///
    /// The executor's raw errors never leave this method; callers only see
    /// the sanitized form inside [`Rejection::Failed`].
    #[instrument(
        skip(self, parent, request, executor),
        fields(class = %request.class, operation = %request.operation)
    )]
    pub async fn execute<E>(
        &self,
        parent: &DeadlineScope,
        request: &OperationRequest,
        executor: &E,
    ) -> Result<ExecutionResult, Rejection>
    where
        E: OperationExecutor + ?Sized,
    {
        if !self.admit(request.class).await {
            debug!("Operation rejected by rate limiter");
            let event = self
                .event(EventType::Security, request)
                .status(STATUS_RATE_LIMITED)
                .severity(Severity::Warning)
                .build();
            self.emit(&event).await;
            return Err(Rejection::RateLimited {
                class: request.class,
            });
        }

        let profile = request.timeout_profile();
        let mut details = self.timeouts.start(profile);
        let (scope, release) = self.timeouts.timeout_context(parent, profile);

        let outcome = scope.run(executor.execute(&scope, request)).await;
        let is_timeout = match &outcome {
            Ok(Ok(_)) => false,
            _ => scope.err() == Some(ScopeError::DeadlineExceeded),
        };
        release.release();
        self.timeouts.record_completion(&mut details, is_timeout);

        let result = match outcome {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(err)) => Err(sanitize_error(&*err)),
            Err(scope_err) => Err(sanitize_error(&scope_err)),
        };

        let event = match &result {
            Ok(result) => {
                debug!(rows = result.rows_affected, elapsed = ?details.elapsed(), "Operation succeeded");
                self.timed_event(class_event_type(request.class), request, &details)
                    .rows_affected(result.rows_affected)
                    .status(STATUS_SUCCESS)
                    .build()
            }
            Err(error) => {
                info!(code = %error.code(), timed_out = is_timeout, "Operation failed");
                self.timed_event(EventType::Error, request, &details)
                    .with_sanitized_error(error)
                    .build()
            }
        };
        self.emit(&event).await;

        result.map_err(Rejection::Failed)
    }

    async fn admit(&self, class: OperationClass) -> bool {
        let delay = self.limiter.backpressure_delay();
        if delay.is_zero() {
            self.limiter.allow(class)
        } else {
            self.limiter.allow_with_wait(class, delay).await
        }
    }

    fn event(&self, event_type: EventType, request: &OperationRequest) -> AuditEventBuilder {
        let mut builder = AuditEvent::builder(event_type)
            .operation(request.operation)
            .user(request.user.as_str())
            .database(request.database.as_str())
            .source(self.source.as_str())
            .metadata("class", request.class.as_str());

        if let Some(table) = &request.table {
            builder = builder.table(table.as_str());
        }
        if let Some(query) = &request.query {
            builder = builder.query(query.as_str());
        }
        if let Some(ip) = &request.ip_address {
            builder = builder.ip_address(ip.as_str());
        }
        builder
    }

    fn timed_event(
        &self,
        event_type: EventType,
        request: &OperationRequest,
        details: &TimeoutDetails,
    ) -> AuditEventBuilder {
        let timeout_ms = u64::try_from(details.timeout.as_millis()).unwrap_or(u64::MAX);
        self.event(event_type, request)
            .duration(details.elapsed())
            .metadata("profile", details.profile.as_str())
            .metadata("timeout_ms", timeout_ms)
            .metadata("timed_out", details.is_timeout())
    }

    /// Audit failures are reported but never fail the operation.
    async fn emit(&self, event: &AuditEvent) {
        if let Err(e) = self.audit.logger().log_event(event).await {
            warn!(error = %e, id = %event.id(), "Failed to record audit event");
        }
    }
}

fn class_event_type(class: OperationClass) -> EventType {
    match class {
        OperationClass::Query => EventType::Query,
        OperationClass::Write => EventType::Write,
        OperationClass::Admin => EventType::Admin,
    }
}
