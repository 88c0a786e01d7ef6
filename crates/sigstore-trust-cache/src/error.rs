//! Error types for trust cache operations

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while preparing, reading or synchronizing the trust cache
#[derive(Debug, Error)]
pub enum Error {
    /// The bundled root document does not hash to the pinned digest
    #[error(
        "trusted root metadata does not match expected file digest: expected {expected}, got {actual}"
    )]
    BootstrapIntegrity { expected: String, actual: String },

    /// Filesystem failure while preparing or reading the cache
    #[error("cache access failed at {}: {source}", path.display())]
    CacheAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The metadata client rejected a role document
    #[error("untrusted metadata for role '{role}': {reason}")]
    UntrustedMetadata { role: String, reason: String },

    /// Fetched target content does not match its verified description
    #[error("target '{target}' failed integrity check: expected sha256 {expected}, got {actual}")]
    TargetIntegrity {
        target: String,
        expected: String,
        actual: String,
    },

    /// Transport-level failure talking to the repository
    #[error("network error: {0}")]
    Network(String),

    /// A network operation exceeded the caller-supplied bound
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// No verified metadata lists the requested target
    #[error("no verified metadata lists target '{0}'")]
    TargetNotFound(String),

    /// Target identifier would escape the targets directory
    #[error("invalid target name: {0}")]
    InvalidTargetName(String),

    /// Malformed path pattern
    #[error("invalid path pattern: {0}")]
    InvalidPattern(String),

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    Config(String),

    /// JSON parsing error
    #[error("failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Build a [`Error::CacheAccess`] for `path`
    pub(crate) fn cache_access(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::CacheAccess {
            path: path.into(),
            source,
        }
    }

    /// Whether the caller may retry the operation that produced this error
    ///
    /// Transport failures, timeouts and local I/O failures are retryable.
    /// Integrity and trust failures never are.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Network(_) | Error::Timeout(_) | Error::CacheAccess { .. }
        )
    }

    /// Whether this error indicates tampered or unverifiable trust material
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            Error::BootstrapIntegrity { .. }
                | Error::UntrustedMetadata { .. }
                | Error::TargetIntegrity { .. }
        )
    }
}

/// Result type for trust cache operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(Error::Network("connection reset".into()).is_retryable());
        assert!(Error::Timeout(Duration::from_secs(5)).is_retryable());
        assert!(Error::cache_access(
            "/tmp/x",
            std::io::Error::from(std::io::ErrorKind::PermissionDenied)
        )
        .is_retryable());

        let integrity = Error::TargetIntegrity {
            target: "rekor.pub".into(),
            expected: "aa".into(),
            actual: "bb".into(),
        };
        assert!(!integrity.is_retryable());
        assert!(integrity.is_integrity_failure());
    }

    #[test]
    fn test_integrity_message_names_target() {
        let err = Error::TargetIntegrity {
            target: "fulcio.crt.pem".into(),
            expected: "00ff".into(),
            actual: "ff00".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("fulcio.crt.pem"));
        assert!(msg.contains("00ff"));
        assert!(msg.contains("ff00"));
    }
}
