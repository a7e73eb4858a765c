//! Turning raw failures into client-safe errors.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;
use tracing::debug;

use super::redact::redact_message;
use super::rules::{self, ErrorCategory};
use crate::severity::Severity;

/// Message used when redaction leaves nothing to show.
const EMPTY_MESSAGE: &str = "unknown error";

/// A classified, redacted error that is safe to return to a client.
///
/// The unredacted text is kept for internal audit logging only: it is skipped
/// by serialization, `Display`, `Debug`, and [`client_response`](Self::client_response).
#[derive(Clone, Serialize)]
pub struct SanitizedError {
    code: String,
    message: String,
    category: ErrorCategory,
    severity: Severity,
    retryable: bool,
    details: BTreeMap<String, Value>,
    #[serde(skip)]
    transient: bool,
    #[serde(skip)]
    internal_message: String,
}

impl SanitizedError {
    /// Machine-readable code, `ERR_<CATEGORY>[_<SUBTYPE>]`.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Redacted message, at most 200 characters.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Whether the raw text described a passing condition such as a busy
    /// or unavailable server. Kept internal.
    pub fn is_transient(&self) -> bool {
        self.transient
    }

    pub fn details(&self) -> &BTreeMap<String, Value> {
        &self.details
    }

    /// The original, unredacted text. Never send this to a client.
    pub fn internal_message(&self) -> &str {
        &self.internal_message
    }

    /// Attach a caller-supplied detail.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// The flat representation handed back to callers.
    pub fn client_response(&self) -> ClientResponse {
        ClientResponse {
            error: self.code.clone(),
            message: self.message.clone(),
            category: self.category,
            severity: self.severity,
            retryable: self.retryable,
            details: self.details.clone(),
        }
    }
}

impl fmt::Display for SanitizedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl fmt::Debug for SanitizedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SanitizedError")
            .field("code", &self.code)
            .field("message", &self.message)
            .field("category", &self.category)
            .field("severity", &self.severity)
            .field("retryable", &self.retryable)
            .field("transient", &self.transient)
            .field("details", &self.details)
            .finish_non_exhaustive()
    }
}

impl StdError for SanitizedError {}

/// Client-facing error body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientResponse {
    pub error: String,
    pub message: String,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub retryable: bool,
    pub details: BTreeMap<String, Value>,
}

impl ClientResponse {
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "error": self.error,
            "message": self.message,
            "category": self.category,
            "severity": self.severity,
            "retryable": self.retryable,
            "details": self.details,
        })
    }
}

/// Sanitize an optional error; `None` in gives `None` out.
pub fn sanitize(err: Option<&(dyn StdError + 'static)>) -> Option<SanitizedError> {
    err.map(sanitize_error)
}

/// Sanitize an error, including the text of its source chain.
pub fn sanitize_error(err: &(dyn StdError + 'static)) -> SanitizedError {
    let mut raw = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !raw.contains(&text) {
            raw.push_str(": ");
            raw.push_str(&text);
        }
        source = cause.source();
    }
    sanitize_string(&raw)
}

/// Classify and redact a raw error message.
pub fn sanitize_string(raw: &str) -> SanitizedError {
    let lower = raw.to_lowercase();

    let category = rules::classify_category(&lower);
    let severity = rules::classify_severity(&lower);
    let retryable = rules::is_retryable(category);
    let transient = rules::is_transient(&lower);
    let code = rules::error_code(category, &lower);

    let mut message = redact_message(raw);
    if message.is_empty() {
        message = EMPTY_MESSAGE.to_string();
    }

    debug!(code = %code, category = %category, severity = %severity, retryable, transient, "Error sanitized");

    SanitizedError {
        code,
        message,
        category,
        severity,
        retryable,
        details: BTreeMap::new(),
        transient,
        internal_message: raw.to_string(),
    }
}
