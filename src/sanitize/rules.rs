//! Ordered keyword rules for error classification.
//!
//! Each table is evaluated top to bottom against the lower-cased raw message
//! and the first matching rule wins. Messages often carry keywords from more
//! than one category ("connection timeout"), so the order is the policy.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::severity::Severity;

/// Where a failure originated, from the client's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Bad input from the caller: syntax, constraints, missing objects
    User,
    /// Resource exhaustion on the server side
    System,
    /// Anything unrecognized
    Internal,
    Auth,
    Timeout,
    Network,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::User => "user",
            ErrorCategory::System => "system",
            ErrorCategory::Internal => "internal",
            ErrorCategory::Auth => "auth",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Network => "network",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rule assigning `value` when the message contains any of `keywords`.
#[derive(Debug, Clone, Copy)]
pub struct KeywordRule<T: 'static> {
    pub value: T,
    pub keywords: &'static [&'static str],
}

impl<T: Copy> KeywordRule<T> {
    pub fn matches(&self, lower: &str) -> bool {
        self.keywords.iter().any(|k| lower.contains(k))
    }
}

fn first_match<T: Copy>(rules: &[KeywordRule<T>], lower: &str) -> Option<T> {
    rules.iter().find(|r| r.matches(lower)).map(|r| r.value)
}

pub const CATEGORY_RULES: &[KeywordRule<ErrorCategory>] = &[
    KeywordRule {
        value: ErrorCategory::Timeout,
        keywords: &["timeout", "deadline", "context canceled"],
    },
    KeywordRule {
        value: ErrorCategory::Auth,
        keywords: &[
            "access denied",
            "permission denied",
            "authentication failed",
            "password",
            "unauthorized",
            "forbidden",
        ],
    },
    KeywordRule {
        value: ErrorCategory::Network,
        keywords: &[
            "can't connect",
            "connection refused",
            "connection reset",
            "network",
            "dial",
            "unreachable",
        ],
    },
    KeywordRule {
        value: ErrorCategory::System,
        keywords: &[
            "out of memory",
            "memory",
            "disk full",
            "disk space",
            "resource limit",
            "too many",
        ],
    },
    KeywordRule {
        value: ErrorCategory::User,
        keywords: &["syntax", "constraint", "duplicate", "not found", "invalid", "malformed"],
    },
    // Generic connectivity wording only counts once nothing more specific matched
    KeywordRule {
        value: ErrorCategory::Network,
        keywords: &["connection", "i/o"],
    },
];

pub const SEVERITY_RULES: &[KeywordRule<Severity>] = &[
    KeywordRule {
        value: Severity::Critical,
        keywords: &["fatal", "critical", "panic", "crash"],
    },
    KeywordRule {
        value: Severity::Error,
        keywords: &["error", "failed", "connection", "timeout"],
    },
    KeywordRule {
        value: Severity::Warning,
        keywords: &["warning", "deprecated", "retry"],
    },
];

/// Wording that marks a failure as transient.
pub const TRANSIENT_KEYWORDS: &[&str] = &["temporary", "transient", "unavailable", "busy"];

/// Code suffixes in priority order: (keyword, suffix).
pub const SUBTYPES: &[(&str, &str)] = &[
    ("timeout", "TIMEOUT"),
    ("connection", "CONNECTION"),
    ("syntax", "SYNTAX"),
    ("constraint", "CONSTRAINT"),
    ("duplicate", "DUPLICATE"),
    ("not found", "NOT_FOUND"),
    ("permission", "PERMISSION"),
];

pub fn classify_category(lower: &str) -> ErrorCategory {
    first_match(CATEGORY_RULES, lower).unwrap_or(ErrorCategory::Internal)
}

pub fn classify_severity(lower: &str) -> Severity {
    first_match(SEVERITY_RULES, lower).unwrap_or(Severity::Info)
}

/// Whether the message describes a transient condition.
pub fn is_transient(lower: &str) -> bool {
    TRANSIENT_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Auth and user failures are never retryable, whatever the wording.
///
/// Transient wording ([`is_transient`]) can only ever make a failure
/// retryable, and every other category already is.
pub fn is_retryable(category: ErrorCategory) -> bool {
    match category {
        ErrorCategory::Auth | ErrorCategory::User => false,
        ErrorCategory::Network | ErrorCategory::Timeout => true,
        ErrorCategory::System | ErrorCategory::Internal => true,
    }
}

/// Build `ERR_<CATEGORY>[_<SUBTYPE>]`.
///
/// The first matching subtype is used; a subtype that repeats the category
/// name adds no suffix.
pub fn error_code(category: ErrorCategory, lower: &str) -> String {
    let base = category.as_str().to_ascii_uppercase();
    match SUBTYPES.iter().find(|(keyword, _)| lower.contains(keyword)) {
        Some((_, suffix)) if *suffix != base => format!("ERR_{}_{}", base, suffix),
        _ => format!("ERR_{}", base),
    }
}
