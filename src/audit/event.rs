//! Audit event model and its builder.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::sanitize::SanitizedError;
use crate::severity::Severity;

/// Status given to events that have not been resolved yet.
pub const STATUS_PENDING: &str = "pending";
pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_ERROR: &str = "error";
pub const STATUS_RATE_LIMITED: &str = "rate_limited";

/// What kind of occurrence an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Auth,
    Query,
    Write,
    Admin,
    Security,
    Error,
    Connection,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Auth => "auth",
            EventType::Query => "query",
            EventType::Write => "write",
            EventType::Admin => "admin",
            EventType::Security => "security",
            EventType::Error => "error",
            EventType::Connection => "connection",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SQL operation behind an event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Select,
    Insert,
    Update,
    Delete,
    Create,
    Drop,
    Alter,
    Truncate,
    Call,
    #[default]
    Other,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Select => "SELECT",
            Operation::Insert => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
            Operation::Create => "CREATE",
            Operation::Drop => "DROP",
            Operation::Alter => "ALTER",
            Operation::Truncate => "TRUNCATE",
            Operation::Call => "CALL",
            Operation::Other => "OTHER",
        }
    }

    /// Detect the operation from a statement's leading keyword.
    ///
    /// Leading comments are not stripped; `WITH` is treated as a read.
    pub fn from_query(query: &str) -> Self {
        let keyword = query
            .trim_start_matches(|c: char| c.is_whitespace() || c == '(')
            .split(|c: char| !c.is_ascii_alphabetic())
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();

        match keyword.as_str() {
            "SELECT" | "WITH" | "SHOW" | "DESCRIBE" | "EXPLAIN" => Operation::Select,
            "INSERT" | "REPLACE" => Operation::Insert,
            "UPDATE" => Operation::Update,
            "DELETE" => Operation::Delete,
            "CREATE" => Operation::Create,
            "DROP" => Operation::Drop,
            "ALTER" => Operation::Alter,
            "TRUNCATE" => Operation::Truncate,
            "CALL" | "EXEC" | "EXECUTE" => Operation::Call,
            _ => Operation::Other,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable record of one audited occurrence.
///
/// Built once through [`AuditEvent::builder`]; only read access is offered
/// afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    id: String,
    timestamp: DateTime<Utc>,
    event_type: EventType,
    operation: Operation,
    user: String,
    database: String,
    table: Option<String>,
    query: Option<String>,
    rows_affected: u64,
    duration: Duration,
    status: String,
    error_msg: Option<String>,
    source: String,
    ip_address: Option<String>,
    severity: Severity,
    metadata: BTreeMap<String, Value>,
}

impl AuditEvent {
    /// Start building an event of `event_type`.
    pub fn builder(event_type: EventType) -> AuditEventBuilder {
        AuditEventBuilder::new(event_type)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn error_msg(&self) -> Option<&str> {
        self.error_msg.as_deref()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ip_address(&self) -> Option<&str> {
        self.ip_address.as_deref()
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }
}

/// Mutable draft of an [`AuditEvent`].
///
/// Starts from defaults (current UTC time, `pending` status, info severity,
/// empty metadata). [`with_error`](Self::with_error) sets the error message
/// and also forces the status to `error` and the severity to
/// [`Severity::Error`], overriding whatever was set before it.
#[derive(Debug, Clone)]
pub struct AuditEventBuilder {
    draft: AuditEvent,
}

impl AuditEventBuilder {
    pub fn new(event_type: EventType) -> Self {
        Self {
            draft: AuditEvent {
                id: Uuid::new_v4().to_string(),
                timestamp: Utc::now(),
                event_type,
                operation: Operation::Other,
                user: String::new(),
                database: String::new(),
                table: None,
                query: None,
                rows_affected: 0,
                duration: Duration::ZERO,
                status: STATUS_PENDING.to_string(),
                error_msg: None,
                source: String::new(),
                ip_address: None,
                severity: Severity::Info,
                metadata: BTreeMap::new(),
            },
        }
    }

    pub fn operation(mut self, operation: Operation) -> Self {
        self.draft.operation = operation;
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.draft.user = user.into();
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.draft.database = database.into();
        self
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.draft.table = Some(table.into());
        self
    }

    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.draft.query = Some(query.into());
        self
    }

    pub fn rows_affected(mut self, rows: u64) -> Self {
        self.draft.rows_affected = rows;
        self
    }

    pub fn duration(mut self, duration: Duration) -> Self {
        self.draft.duration = duration;
        self
    }

    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.draft.status = status.into();
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.draft.source = source.into();
        self
    }

    pub fn ip_address(mut self, ip: impl Into<String>) -> Self {
        self.draft.ip_address = Some(ip.into());
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.draft.severity = severity;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.draft.metadata.insert(key.into(), value.into());
        self
    }

    /// Record a failure: sets the message, status `error` and severity error.
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.draft.error_msg = Some(message.into());
        self.draft.status = STATUS_ERROR.to_string();
        self.draft.severity = Severity::Error;
        self
    }

    /// Record a classified failure.
    ///
    /// Audit records are internal, so the unredacted text is kept alongside
    /// the client-facing code and category.
    pub fn with_sanitized_error(self, error: &SanitizedError) -> Self {
        self.with_error(error.internal_message())
            .metadata("error_code", error.code())
            .metadata("error_category", error.category().as_str())
            .metadata("retryable", error.is_retryable())
            .metadata("transient", error.is_transient())
    }

    pub fn build(self) -> AuditEvent {
        self.draft
    }
}
