//! Error types for moltdigest.
//!
//! Library crates use [`DigestError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` and maps [`ErrorKind`] to exit codes.

use std::path::PathBuf;

/// Top-level error type for all moltdigest operations.
#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// The external content source could not be reached (network, timeout, HTTP status).
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// The source answered, but the data does not have the candidate shape.
    #[error("malformed response: {message}")]
    MalformedResponse { message: String },

    /// A rendered entry broke the per-entry template contract.
    #[error("template violation for {post_url}: {reason}")]
    TemplateViolation { post_url: String, reason: String },

    /// A digest for this date already exists and overwrite was not requested.
    #[error("digest for {date_key} already published at {path:?}")]
    AlreadyPublished { date_key: String, path: PathBuf },

    /// Filesystem failure while writing a digest or its history.
    #[error("publish I/O error at {path:?}: {source}")]
    PublishIo {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Ledger (publication history) backend error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error outside the publish step.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad date key, invalid argument, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DigestError>;

/// Coarse classification of a [`DigestError`], used for exit codes and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    SourceUnavailable,
    MalformedResponse,
    TemplateViolation,
    AlreadyPublished,
    Publish,
    Validation,
}

impl DigestError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a malformed-response error from any displayable message.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedResponse {
            message: msg.into(),
        }
    }

    /// Create a template violation for the entry linking to `post_url`.
    pub fn template(post_url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TemplateViolation {
            post_url: post_url.into(),
            reason: reason.into(),
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

    /// Wrap a `std::io::Error` raised while publishing.
    pub fn publish_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::PublishIo {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config { .. } => ErrorKind::Config,
            Self::SourceUnavailable(_) => ErrorKind::SourceUnavailable,
            Self::MalformedResponse { .. } => ErrorKind::MalformedResponse,
            Self::TemplateViolation { .. } => ErrorKind::TemplateViolation,
            Self::AlreadyPublished { .. } => ErrorKind::AlreadyPublished,
            Self::PublishIo { .. } | Self::Storage(_) | Self::Io { .. } => ErrorKind::Publish,
            Self::Validation { .. } => ErrorKind::Validation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = DigestError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = DigestError::template("https://example.com/p/1", "4 summary points");
        assert!(err.to_string().contains("https://example.com/p/1"));
        assert!(err.to_string().contains("4 summary points"));
    }

    #[test]
    fn kinds_group_publish_failures() {
        let io = std::io::Error::other("disk full");
        assert_eq!(
            DigestError::publish_io("/tmp/x", io).kind(),
            ErrorKind::Publish
        );
        assert_eq!(
            DigestError::Storage("locked".into()).kind(),
            ErrorKind::Publish
        );
        assert_eq!(
            DigestError::SourceUnavailable("timeout".into()).kind(),
            ErrorKind::SourceUnavailable
        );
    }
}
