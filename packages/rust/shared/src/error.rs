//! Error types for a11yscan.
//!
//! Library crates use [`A11yScanError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all a11yscan operations.
#[derive(Debug, thiserror::Error)]
pub enum A11yScanError {
    /// Malformed scan submission, rejected before it is enqueued.
    #[error("invalid scan spec: {message}")]
    InvalidSpec { message: String },

    /// Unknown job identifier.
    #[error("job not found: {0}")]
    NotFound(String),

    /// A single page could not be rendered (network error or timeout).
    #[error("navigation failed for {url}: {message}")]
    Navigation { url: String, message: String },

    /// The accessibility rule evaluator failed on a page.
    #[error("rule evaluation failed: {0}")]
    RuleEvaluation(String),

    /// Progress update lower than the previous value or above 100.
    #[error("progress regression for job {job_id}: {previous} -> {requested}")]
    ProgressRegression {
        job_id: String,
        previous: u8,
        requested: u8,
    },

    /// Progress was reported for a job that is not running.
    #[error("job {job_id} is {state}, not active")]
    NotActive { job_id: String, state: String },

    /// A job attempt panicked or its task was aborted.
    #[error("job worker failed: {0}")]
    Worker(String),

    /// The queue no longer accepts submissions.
    #[error("job queue is shut down")]
    QueueClosed,

    /// A job failed on every allowed attempt.
    #[error("job failed after {attempts} attempts: {reason}")]
    RetryExhausted { attempts: u32, reason: String },

    /// Generative enrichment is not available.
    #[error("enrichment unavailable: {0}")]
    Enrichment(String),

    /// The browser session could not be acquired.
    #[error("browser error: {0}")]
    Browser(String),

    /// The crawl finished without auditing a single page.
    #[error("no pages could be audited from {0}")]
    NoPagesAudited(String),

    /// The job was cancelled while running.
    #[error("job cancelled")]
    Cancelled,

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error outside of page navigation.
    #[error("network error: {0}")]
    Network(String),

    /// HTML or response parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, A11yScanError>;

impl A11yScanError {
    /// Create an invalid-spec error from any displayable message.
    pub fn invalid_spec(msg: impl Into<String>) -> Self {
        Self::InvalidSpec {
            message: msg.into(),
        }
    }

    /// Create a navigation error for `url`.
    pub fn navigation(url: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Navigation {
            url: url.into(),
            message: msg.into(),
        }
    }

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

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether a job failing with this error may be attempted again.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Cancelled
                | Self::InvalidSpec { .. }
                | Self::ProgressRegression { .. }
                | Self::NotActive { .. }
                | Self::QueueClosed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = A11yScanError::invalid_spec("url must be absolute");
        assert_eq!(err.to_string(), "invalid scan spec: url must be absolute");

        let err = A11yScanError::ProgressRegression {
            job_id: "job-1".into(),
            previous: 30,
            requested: 10,
        };
        assert!(err.to_string().contains("30 -> 10"));
    }

    #[test]
    fn cancellation_is_not_retryable() {
        assert!(!A11yScanError::Cancelled.is_retryable());
        assert!(A11yScanError::Browser("launch failed".into()).is_retryable());
        assert!(A11yScanError::NoPagesAudited("https://example.com".into()).is_retryable());
    }
}
