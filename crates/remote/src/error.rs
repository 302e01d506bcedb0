use miette::Diagnostic;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors from setting up remote cache clients and servers.
///
/// Failures of individual cache operations are reported as
/// [`kiln_cache::Error`] instead, so the chain can downgrade them.
#[derive(Error, Debug, Diagnostic)]
pub enum RemoteError {
    /// The configured URL cannot be used
    #[error("Invalid remote cache URL '{url}': {reason}")]
    #[diagnostic(
        code(kiln::remote::invalid_url),
        help("Use http://, https://, grpc:// or grpcs:// followed by host and port")
    )]
    InvalidUrl {
        /// The offending URL
        url: String,
        /// Why it was rejected
        reason: String,
    },

    /// An HTTP or gRPC client could not be constructed
    #[error("Failed to create {backend} client: {message}")]
    #[diagnostic(code(kiln::remote::client))]
    Client {
        /// Client kind
        backend: &'static str,
        /// Underlying error
        message: String,
    },

    /// A server could not bind its listen address
    #[error("Failed to bind {addr}")]
    #[diagnostic(
        code(kiln::remote::bind),
        help("Check that the address is free and that you may listen on it")
    )]
    Bind {
        /// Address requested
        addr: SocketAddr,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A server stopped with an error
    #[error("{backend} server failed: {message}")]
    #[diagnostic(code(kiln::remote::serve))]
    Serve {
        /// Server kind
        backend: &'static str,
        /// Underlying error
        message: String,
    },
}

impl RemoteError {
    /// Create an invalid URL error
    #[must_use]
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Create a client construction error
    #[must_use]
    pub fn client(backend: &'static str, message: impl Into<String>) -> Self {
        Self::Client {
            backend,
            message: message.into(),
        }
    }

    /// Create a server error
    #[must_use]
    pub fn serve(backend: &'static str, message: impl Into<String>) -> Self {
        Self::Serve {
            backend,
            message: message.into(),
        }
    }
}

/// Result type for remote setup operations
pub type Result<T> = std::result::Result<T, RemoteError>;
