//! Error types for the cache crate

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for cache operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error during cache operations
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(kiln::cache::io),
        help("Check file permissions and available disk space")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "read", "write", "rename")
        operation: String,
    },

    /// Configuration or validation error
    #[error("Cache configuration error: {message}")]
    #[diagnostic(code(kiln::cache::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },

    /// A string could not be parsed as a fingerprint
    #[error("Invalid fingerprint '{value}': {reason}")]
    #[diagnostic(
        code(kiln::cache::invalid_fingerprint),
        help("Fingerprints are 64 lowercase hex characters")
    )]
    InvalidFingerprint {
        /// The rejected input
        value: String,
        /// Why it was rejected
        reason: String,
    },

    /// A stored or received artifact could not be decoded
    #[error("Malformed cache entry {key}: {message}")]
    #[diagnostic(
        code(kiln::cache::malformed),
        help("The entry is ignored and will be rebuilt")
    )]
    Malformed {
        /// Fingerprint (or other identifier) of the entry
        key: String,
        /// Decoding failure
        message: String,
    },

    /// A cache backend could not be reached
    #[error("{backend} cache unavailable: {message}")]
    #[diagnostic(code(kiln::cache::unavailable))]
    Unavailable {
        /// Backend name
        backend: &'static str,
        /// Transport failure description
        message: String,
    },

    /// A cache backend answered with something the protocol does not allow
    #[error("{backend} cache protocol error: {message}")]
    #[diagnostic(code(kiln::cache::protocol))]
    Protocol {
        /// Backend name
        backend: &'static str,
        /// What was wrong with the response
        message: String,
    },

    /// Blocking cache work was cancelled or panicked
    #[error("Background cache task failed: {message}")]
    #[diagnostic(code(kiln::cache::background))]
    Background {
        /// Join failure description
        message: String,
    },
}

impl Error {
    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create an I/O error with path context
    #[must_use]
    pub fn io(source: std::io::Error, path: impl AsRef<Path>, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create an I/O error without path context
    #[must_use]
    pub fn io_no_path(source: std::io::Error, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: None,
            operation: operation.into(),
        }
    }

    /// Create a malformed-entry error
    #[must_use]
    pub fn malformed(key: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Malformed {
            key: key.into(),
            message: msg.into(),
        }
    }

    /// Create an unavailable-backend error
    #[must_use]
    pub fn unavailable(backend: &'static str, msg: impl Into<String>) -> Self {
        Self::Unavailable {
            backend,
            message: msg.into(),
        }
    }

    /// Create a protocol error
    #[must_use]
    pub fn protocol(backend: &'static str, msg: impl Into<String>) -> Self {
        Self::Protocol {
            backend,
            message: msg.into(),
        }
    }

    /// Returns true if this error means the backend is unreachable and the
    /// operation should quietly degrade to a miss or no-op.
    #[must_use]
    pub const fn is_gracefully_degradable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    /// Whether the underlying I/O error is `NotFound`.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Background {
            message: err.to_string(),
        }
    }
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, Error>;
