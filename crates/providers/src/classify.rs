//! Failure classification for LLM invocations.
//!
//! Maps transport and HTTP errors to retry decisions. Interruptions are
//! never retried; unknown failures are fatal.

use dk_domain::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Transient — worth retrying with backoff.
    Retriable,
    /// The provider rejected the request (non-retriable 4xx). Recorded as a
    /// persistent provider problem until the next success.
    Rejected,
    /// Abort or unclassifiable failure.
    Fatal,
}

/// Transport error fragments that indicate a transient network fault.
const RETRIABLE_TRANSPORT_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "ETIMEDOUT",
    "ECONNRESET",
    "ECONNREFUSED",
    "EPIPE",
    "socket hang up",
    "fetch failed",
    "connection reset",
    "connection closed",
    "rate limit",
];

pub fn classify_failure(err: &Error) -> FailureClass {
    match err {
        Error::Interrupted(_) => FailureClass::Fatal,
        Error::Transport(message) => {
            let lower = message.to_lowercase();
            let hit = RETRIABLE_TRANSPORT_PATTERNS
                .iter()
                .any(|p| lower.contains(&p.to_lowercase()));
            if hit {
                FailureClass::Retriable
            } else {
                FailureClass::Fatal
            }
        }
        Error::Http { status, .. } => match status {
            408 | 429 => FailureClass::Retriable,
            500..=599 => FailureClass::Retriable,
            400..=499 => FailureClass::Rejected,
            _ => FailureClass::Fatal,
        },
        Error::LlmRejected(_) => FailureClass::Rejected,
        _ => FailureClass::Fatal,
    }
}
