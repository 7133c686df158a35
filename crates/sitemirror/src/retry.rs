//! Retry policy for resource fetches.
//!
//! Errors are classified into a small set of kinds; the policy decides
//! whether another attempt is allowed and how long to wait before it.

use std::time::Duration;

use crate::config::FetchConfig;

/// High-level classification of a failure for retry purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connect or read deadline exceeded (also HTTP 408).
    Timeout,
    /// Server asked us to slow down (429, 503).
    Throttled,
    /// Connection reset, DNS failure, truncated body.
    Connection,
    /// Other 5xx statuses.
    Http5xx(u16),
    /// Not retried.
    Other,
}

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    NoRetry,
    RetryAfter(Duration),
}

/// Fixed-delay policy with an attempt ceiling.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            delay: Duration::from_millis(config.retry_delay_ms),
        }
    }

    /// `attempt` is 1-based (1 = first attempt).
    pub fn decide(&self, attempt: u32, kind: ErrorKind) -> RetryDecision {
        if attempt >= self.max_attempts {
            return RetryDecision::NoRetry;
        }
        match kind {
            ErrorKind::Other => RetryDecision::NoRetry,
            ErrorKind::Timeout
            | ErrorKind::Throttled
            | ErrorKind::Connection
            | ErrorKind::Http5xx(_) => RetryDecision::RetryAfter(self.delay),
        }
    }
}

/// Classify an HTTP status code for retry decisions.
pub fn classify_http_status(code: u16) -> ErrorKind {
    match code {
        408 => ErrorKind::Timeout,
        429 | 503 => ErrorKind::Throttled,
        500..=599 => ErrorKind::Http5xx(code),
        _ => ErrorKind::Other,
    }
}

/// Classify a transport error from the HTTP client.
pub fn classify_reqwest_error(e: &reqwest::Error) -> ErrorKind {
    if e.is_timeout() {
        return ErrorKind::Timeout;
    }
    if e.is_connect() || e.is_request() || e.is_body() || e.is_decode() {
        return ErrorKind::Connection;
    }
    ErrorKind::Other
}
