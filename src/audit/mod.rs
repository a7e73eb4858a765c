//! Audit trail: the event model and pluggable sinks.

mod event;
mod logger;

pub use event::{
    AuditEvent, AuditEventBuilder, EventType, Operation, STATUS_ERROR, STATUS_PENDING,
    STATUS_RATE_LIMITED, STATUS_SUCCESS,
};
pub use logger::{AuditContext, AuditLogger, DiscardLogger, MemoryAuditLogger};
