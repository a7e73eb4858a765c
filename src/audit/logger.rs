//! Audit sinks.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::trace;

use super::event::{AuditEvent, EventType};
use crate::error::{GuardError, Result};

/// Capability interface for audit sinks.
///
/// Emission is awaited inline by the governed operation, so a slow sink
/// directly extends the caller's latency. Implementations must bound their
/// own blocking.
#[async_trait]
pub trait AuditLogger: Send + Sync {
    async fn log_query(&self, event: &AuditEvent) -> Result<()>;

    async fn log_write(&self, event: &AuditEvent) -> Result<()>;

    async fn log_admin(&self, event: &AuditEvent) -> Result<()>;

    async fn log_error(&self, event: &AuditEvent) -> Result<()>;

    async fn log_security(&self, event: &AuditEvent) -> Result<()>;

    /// Flush and release the sink.
    async fn close(&self) -> Result<()>;

    /// Route an event to the method matching its type.
    ///
    /// Auth and connection events are security-relevant and go through
    /// `log_security`.
    async fn log_event(&self, event: &AuditEvent) -> Result<()> {
        match event.event_type() {
            EventType::Query => self.log_query(event).await,
            EventType::Write => self.log_write(event).await,
            EventType::Admin => self.log_admin(event).await,
            EventType::Error => self.log_error(event).await,
            EventType::Security | EventType::Auth | EventType::Connection => {
                self.log_security(event).await
            }
        }
    }
}

/// Sink that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardLogger;

#[async_trait]
impl AuditLogger for DiscardLogger {
    async fn log_query(&self, _event: &AuditEvent) -> Result<()> {
        Ok(())
    }

    async fn log_write(&self, _event: &AuditEvent) -> Result<()> {
        Ok(())
    }

    async fn log_admin(&self, _event: &AuditEvent) -> Result<()> {
        Ok(())
    }

    async fn log_error(&self, _event: &AuditEvent) -> Result<()> {
        Ok(())
    }

    async fn log_security(&self, _event: &AuditEvent) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Sink that keeps events in memory. Meant for tests, not persistence.
///
/// Recorded events stay readable after [`close`](AuditLogger::close), but
/// new events are rejected.
#[derive(Debug, Default)]
pub struct MemoryAuditLogger {
    events: Mutex<Vec<AuditEvent>>,
    closed: AtomicBool,
}

impl MemoryAuditLogger {
    pub fn new() -> Self {
        Self::default()
    }

    fn append(&self, event: &AuditEvent) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(GuardError::Audit(format!(
                "logger is closed, dropping event {}",
                event.id()
            )));
        }
        trace!(id = %event.id(), event_type = %event.event_type(), "Recording audit event");
        self.events.lock().push(event.clone());
        Ok(())
    }

    /// Copy of every recorded event, oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    /// Copy of the recorded events of one type.
    pub fn events_of_type(&self, event_type: EventType) -> Vec<AuditEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

#[async_trait]
impl AuditLogger for MemoryAuditLogger {
    async fn log_query(&self, event: &AuditEvent) -> Result<()> {
        self.append(event)
    }

    async fn log_write(&self, event: &AuditEvent) -> Result<()> {
        self.append(event)
    }

    async fn log_admin(&self, event: &AuditEvent) -> Result<()> {
        self.append(event)
    }

    async fn log_error(&self, event: &AuditEvent) -> Result<()> {
        self.append(event)
    }

    async fn log_security(&self, event: &AuditEvent) -> Result<()> {
        self.append(event)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

fn discard_logger() -> &'static Arc<dyn AuditLogger> {
    static DISCARD: OnceLock<Arc<dyn AuditLogger>> = OnceLock::new();
    DISCARD.get_or_init(|| Arc::new(DiscardLogger))
}

/// Request-scoped audit state, passed explicitly to each call site.
#[derive(Clone, Default)]
pub struct AuditContext {
    logger: Option<Arc<dyn AuditLogger>>,
}

impl AuditContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_logger(logger: Arc<dyn AuditLogger>) -> Self {
        Self {
            logger: Some(logger),
        }
    }

    /// The active logger, or the shared [`DiscardLogger`] when none was supplied.
    pub fn logger(&self) -> Arc<dyn AuditLogger> {
        match &self.logger {
            Some(logger) => Arc::clone(logger),
            None => Arc::clone(discard_logger()),
        }
    }

    pub fn has_logger(&self) -> bool {
        self.logger.is_some()
    }
}

impl std::fmt::Debug for AuditContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditContext")
            .field("has_logger", &self.logger.is_some())
            .finish()
    }
}
