//! Error types for cncflow.
//!
//! Library crates use [`CncFlowError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// How a failed stage invocation is classified for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeErrorKind {
    /// Nothing is listening at the service address.
    ConnectionRefused,
    /// The deadline elapsed; the remote operation may still be running.
    Timeout,
    /// Any other transport failure, non-2xx status, or unreadable body.
    Other,
}

impl std::fmt::Display for InvokeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ConnectionRefused => "connection-refused",
            Self::Timeout => "timeout",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

/// Top-level error type for all cncflow operations.
#[derive(Debug, thiserror::Error)]
pub enum CncFlowError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (duplicate rule id, bad address, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Malformed input document (project snapshot, rule file).
    #[error("parse error: {message}")]
    Parse { message: String },

    /// The stage's service is not reachable.
    #[error("{stage} not running at {url}")]
    ServiceUnreachable { stage: String, url: String },

    /// The stage's service did not answer before the deadline.
    #[error("{stage} timed out after {timeout_ms}ms at {url} (operation may still be running)")]
    ServiceTimeout {
        stage: String,
        url: String,
        timeout_ms: u64,
    },

    /// The stage's service answered with an error or an unusable body.
    #[error("{stage} failed at {url}: {message}")]
    ServiceFailed {
        stage: String,
        url: String,
        message: String,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, CncFlowError>;

impl CncFlowError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Classification of a stage invocation failure, `None` for other errors.
    pub fn invoke_kind(&self) -> Option<InvokeErrorKind> {
        match self {
            Self::ServiceUnreachable { .. } => Some(InvokeErrorKind::ConnectionRefused),
            Self::ServiceTimeout { .. } => Some(InvokeErrorKind::Timeout),
            Self::ServiceFailed { .. } => Some(InvokeErrorKind::Other),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = CncFlowError::config("missing source path");
        assert_eq!(err.to_string(), "config error: missing source path");

        let err = CncFlowError::ServiceUnreachable {
            stage: "analysis".into(),
            url: "http://localhost:3005".into(),
        };
        assert_eq!(err.to_string(), "analysis not running at http://localhost:3005");
    }

    #[test]
    fn invoke_kind_classification() {
        let timeout = CncFlowError::ServiceTimeout {
            stage: "primary-scan".into(),
            url: "http://localhost:3001".into(),
            timeout_ms: 300_000,
        };
        assert_eq!(timeout.invoke_kind(), Some(InvokeErrorKind::Timeout));
        assert!(timeout.to_string().contains("may still be running"));

        let failed = CncFlowError::ServiceFailed {
            stage: "tool-scan".into(),
            url: "http://localhost:3002".into(),
            message: "HTTP 500".into(),
        };
        assert_eq!(failed.invoke_kind(), Some(InvokeErrorKind::Other));

        assert_eq!(CncFlowError::validation("x").invoke_kind(), None);
    }
}
