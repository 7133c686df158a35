//! Error types for the mirroring pipeline.
//!
//! Per-resource failures ([`FetchError`]) never escape the fetcher; they are
//! recorded on the job and the reference stays remote. Only a missing page
//! snapshot is fatal ([`MirrorError::NoSnapshot`]).

use std::fmt;

use crate::retry::{classify_http_status, ErrorKind};
use crate::snapshot::PageSnapshot;

/// Failure of a single resource fetch attempt.
#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("transient failure ({kind:?}): {message}")]
    Transient { kind: ErrorKind, message: String },

    #[error("not found (HTTP 404)")]
    NotFound,

    #[error("empty response body")]
    EmptyBody,

    #[error("HTTP {0}")]
    Status(u16),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),
}

impl FetchError {
    /// Retry classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::Transient { kind, .. } => *kind,
            FetchError::Status(code) => classify_http_status(*code),
            FetchError::NotFound | FetchError::EmptyBody | FetchError::Storage(_) => {
                ErrorKind::Other
            }
        }
    }
}

/// Errors raised while loading or validating configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid selector `{selector}`: {reason}")]
    Selector { selector: String, reason: String },

    #[error("invalid pattern `{pattern}`: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid attribute name `{0}`")]
    Attribute(String),

    #[error("invalid URL `{url}`: {reason}")]
    Url { url: String, reason: String },
}

/// Errors that abort a mirror run.
#[derive(thiserror::Error, Debug)]
pub enum MirrorError {
    #[error("no page snapshot could be obtained: {0}")]
    NoSnapshot(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("rewrite failed: {0}")]
    Rewrite(String),

    #[error("render error: {0}")]
    Render(String),
}

/// Convenience result type.
pub type MirrorResult<T> = Result<T, MirrorError>;

/// Pipeline stage a degraded run failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Interaction,
    Output,
    Rewrite,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Interaction => "interaction",
            Stage::Output => "output",
            Stage::Rewrite => "rewrite",
        };
        f.write_str(name)
    }
}

/// A stage failed after a usable snapshot existed.
///
/// Carried as a value, not propagated: the orchestrator still mirrors
/// `snapshot` and marks the save as degraded.
#[derive(Debug, Clone)]
pub struct PartialFailure {
    pub snapshot: PageSnapshot,
    pub stage: Stage,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_errors_classify_through_http_table() {
        assert!(matches!(FetchError::Status(502).kind(), ErrorKind::Http5xx(502)));
        assert_eq!(FetchError::Status(403).kind(), ErrorKind::Other);
        assert_eq!(FetchError::NotFound.kind(), ErrorKind::Other);
        assert_eq!(FetchError::EmptyBody.kind(), ErrorKind::Other);
    }

    #[test]
    fn transient_keeps_its_kind() {
        let err = FetchError::Transient {
            kind: ErrorKind::Timeout,
            message: "deadline".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }
}
