//! Scrubbing of text that leaves a boundary.
//!
//! A failing component reports its own error string, and audit entries carry a
//! preview of the source. Both go through [`redact_error_message`] so that
//! endpoints, addresses, credentials and stack frames stay on the host.

use std::sync::LazyLock;

use regex::Regex;

/// Ordered `(pattern, replacement)` table. Credentials run first because they
/// can embed URLs.
static SCRUBBERS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"eyJ[\w-]+\.eyJ[\w-]+\.[\w-]+", "[REDACTED]"),
        (r"\bsk-[\w-]{16,}", "[REDACTED]"),
        (
            r"(?i)\b(bearer\s+\S+|(?:api[_-]?key|token|password|secret)\s*[=:]\s*\S+)",
            "[REDACTED]",
        ),
        (r"\b[0-9a-fA-F]{64,}\b", "[REDACTED]"),
        (r#"(?:https?|wss?|blob|data):[^\s'"`)\]}>]+"#, "[url]"),
        (r"\b\d{1,3}(?:\.\d{1,3}){3}(?::\d+)?\b", "[addr]"),
        (r"\b[A-Z]:\\[\w.\\-]+", "[path]"),
        (
            r"/(?:home|Users|etc|var|tmp|opt|usr|root|srv|proc|run|nix)(?:/[\w.-]+)+",
            "[path]",
        ),
    ]
    .into_iter()
    .map(|(pattern, replacement)| {
        (Regex::new(pattern).expect("static scrubber pattern"), replacement)
    })
    .collect()
});

/// Frames of a JS stack trace (`at fn (file:line:col)`, `fn@file:line:col`).
static FRAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:at\s.+|[\w$.<>]*@\S+:\d+:\d+)$").expect("static stack frame pattern")
});

/// Redact sensitive fragments from a message and drop stack frames.
///
/// Credentials become `[REDACTED]`, URLs `[url]`, IP addresses `[addr]` and
/// file paths `[path]`. Blank lines are removed.
pub fn redact_error_message(error: &str) -> String {
    let scrubbed = SCRUBBERS
        .iter()
        .fold(error.to_string(), |text, (re, replacement)| {
            re.replace_all(&text, *replacement).into_owned()
        });

    scrubbed
        .lines()
        .filter(|line| !line.trim().is_empty() && !FRAME_RE.is_match(line))
        .collect::<Vec<_>>()
        .join("\n")
}
