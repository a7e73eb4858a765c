//! Failure containment: classify raw errors and redact them for clients.
//!
//! Raw error text stays inside the process. Callers get a [`SanitizedError`]
//! whose code, redacted message, category, severity and retryability are safe
//! to serialize; the original text is kept only for internal audit records.

mod redact;
mod rules;
mod sanitizer;

pub use redact::{redact_message, INTERNAL, MAX_MESSAGE_LEN, REDACTED};
pub use rules::{
    classify_category, classify_severity, error_code, is_retryable, is_transient, ErrorCategory,
    KeywordRule, CATEGORY_RULES, TRANSIENT_KEYWORDS, SEVERITY_RULES, SUBTYPES,
};
pub use sanitizer::{sanitize, sanitize_error, sanitize_string, ClientResponse, SanitizedError};
