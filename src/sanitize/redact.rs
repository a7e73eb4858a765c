//! Pattern-based redaction of error text.

use regex::Regex;
use std::sync::OnceLock;
use tracing::warn;

/// Marker replacing sensitive infrastructure details.
pub const REDACTED: &str = "[REDACTED]";
/// Marker replacing stack frames and internal identifiers.
pub const INTERNAL: &str = "[INTERNAL]";
/// Longest message, in characters, that leaves the trust boundary.
pub const MAX_MESSAGE_LEN: usize = 200;

const ELLIPSIS: &str = "...";

/// Applied in order. Replacements may reference capture groups.
///
/// Frames and source locations go before the address and path rules so a
/// file path inside a stack frame is marked internal as a whole.
const PATTERNS: &[(&str, &str)] = &[
    // Connection strings carry credentials
    (r"(?i)\b[a-z][a-z0-9+.\-]*://\S+", REDACTED),
    (r"(?i)\bgoroutine\s+\d+(?:\s*\[[^\]]*\])?:?", INTERNAL),
    // source locations such as /src/app/main.go:42 or lib.rs:10:5
    (
        r"(?:[\w.\-]*[/\\])*[\w\-]+\.(?:go|rs|c|cc|cpp|h|py|java):\d+(?::\d+)?\b",
        INTERNAL,
    ),
    // IPv4, with an optional port
    (r"\b\d{1,3}(?:\.\d{1,3}){3}(?::\d{1,5})?\b", REDACTED),
    // IPv6 in brackets, with an optional port
    (
        r"(?i)\[[0-9a-f.]*:[0-9a-f.]*:[0-9a-f:.]*\](?::\d{1,5})?",
        REDACTED,
    ),
    // IPv6 compressed after a leading group; never the head of an `a::b` path
    (
        r"(?i)\b(?:[0-9a-f]{1,4}:)+:(?:[0-9a-f]{1,4}(?::[0-9a-f]{1,4})*)?(?P<tail>[^\w]|$)",
        "[REDACTED]${tail}",
    ),
    // IPv6 compressed at the start, such as ::1 or ::ffff:c0a8:105
    (
        r"(?i)(?P<head>^|[^\w:])::(?:[0-9a-f]{1,4}(?::[0-9a-f]{1,4})*)?(?::\d{1,5})?(?P<tail>[^\w]|$)",
        "${head}[REDACTED]${tail}",
    ),
    // IPv6, full form
    (r"(?i)\b(?:[0-9a-f]{1,4}:){3,7}[0-9a-f]{1,4}\b", REDACTED),
    (r"(?i)\b(host(?:name)?\s*[=:]\s*)[^\s,;)]+", "${1}[REDACTED]"),
    (
        r#"(?i)\b(database|table|schema|relation|column|db)(\s+)(?:'[^']*'|"[^"]*"|`[^`]*`)"#,
        "${1}${2}[REDACTED]",
    ),
    (r"(?i)\b(port\s*[=:]?\s*)\d{1,5}\b", "${1}[REDACTED]"),
    // Filesystem paths, only where a token starts
    (
        r#"(?P<lead>^|[\s'"(=])(?:/[\w.\-]+){2,}/?"#,
        "${lead}[REDACTED]",
    ),
    (r#"(?i)\b[a-z]:\\[^\s'"]+"#, REDACTED),
    // Whole statements; SELECT needs a column list before FROM
    (
        r#"(?is)\b(?:select\s+(?:\*|[\w.*()"`]+(?:\s*,\s*[\w.*()"`]+)*)\s+from\b|insert\s+into\b|update\s+\S+\s+set\b|delete\s+from\b)[^;]*;?"#,
        REDACTED,
    ),
    // qualified methods such as pkg.(*Type).Method
    (r"\b(?:[a-z_]\w*\.)+\(\*?[A-Za-z_]\w*\)\.[A-Za-z_]\w*", INTERNAL),
    // plain frames such as main.main() or pkg.funcName(0xc0, 0x1)
    (r"\b[a-z_]\w*(?:\.[A-Za-z_]\w*)+\([^()]*\)", INTERNAL),
    (r"\b(?:[A-Za-z_]\w*::)+[A-Za-z_]\w*(?:\(\))?", INTERNAL),
    // addresses and frame offsets such as +0x1d
    (r"(?i)\+?\b0x[0-9a-f]+\b", INTERNAL),
];

fn compile(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(pattern, error = %e, "Skipping invalid redaction pattern");
            None
        }
    }
}

fn redactor() -> &'static [(Regex, &'static str)] {
    static REDACTOR: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    REDACTOR.get_or_init(|| {
        PATTERNS
            .iter()
            .filter_map(|(pattern, replacement)| compile(pattern).map(|re| (re, *replacement)))
            .collect()
    })
}

/// Redact `raw` for display outside the trust boundary.
///
/// Infrastructure details become `[REDACTED]`, internal frames become
/// `[INTERNAL]`, and the result is trimmed and capped at
/// [`MAX_MESSAGE_LEN`] characters.
pub fn redact_message(raw: &str) -> String {
    let mut message = raw.to_string();
    for (pattern, replacement) in redactor() {
        message = pattern.replace_all(&message, *replacement).into_owned();
    }

    truncate(message.trim())
}

fn truncate(message: &str) -> String {
    if message.chars().count() <= MAX_MESSAGE_LEN {
        return message.to_string();
    }
    let keep = MAX_MESSAGE_LEN - ELLIPSIS.len();
    let mut truncated: String = message.chars().take(keep).collect();
    truncated.truncate(truncated.trim_end().len());
    truncated.push_str(ELLIPSIS);
    truncated
}
