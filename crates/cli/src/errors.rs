//! CLI error types
//!
//! Library errors keep their own diagnostics and are wrapped transparently;
//! the CLI adds configuration and build-outcome errors on top.

use miette::Diagnostic;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Exit code for a successful run
pub const EXIT_OK: i32 = 0;
/// Exit code for failed targets
pub const EXIT_BUILD_FAILED: i32 = 1;
/// Exit code for invalid configuration or arguments
pub const EXIT_CLI: i32 = 2;

/// CLI error types with diagnostics
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// A configuration or graph file could not be read
    #[error("Cannot read {}", path.display())]
    #[diagnostic(
        code(kiln::cli::file_error),
        help("Check file permissions and ensure the path exists")
    )]
    File {
        /// File path
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A configuration or graph file is malformed
    #[error("Invalid {kind} file {}: {message}", path.display())]
    #[diagnostic(code(kiln::cli::parse_error))]
    Parse {
        /// What the file holds ("config", "graph")
        kind: &'static str,
        /// File path
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// Invalid arguments or settings
    #[error("{message}")]
    #[diagnostic(code(kiln::cli::config))]
    Config {
        /// Error message
        message: String,
        /// Suggestion for the user
        #[help]
        help: Option<String>,
    },

    /// The report could not be written
    #[error("Cannot write output")]
    #[diagnostic(code(kiln::cli::output))]
    Output(#[source] std::io::Error),

    /// The build graph is invalid
    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] kiln_graph::Error),

    /// The build could not start
    #[error(transparent)]
    #[diagnostic(transparent)]
    Engine(#[from] kiln_engine::Error),

    /// The local cache could not be used
    #[error(transparent)]
    #[diagnostic(transparent)]
    Cache(#[from] kiln_cache::Error),

    /// A remote cache client or server failed
    #[error(transparent)]
    #[diagnostic(transparent)]
    Remote(#[from] kiln_remote::RemoteError),

    /// Some targets did not build
    #[error("{failed} of {total} targets failed")]
    #[diagnostic(
        code(kiln::cli::build_failed),
        help("Rerun with --keep-going to build every target not depending on a failure")
    )]
    BuildFailed {
        /// Failed targets
        failed: usize,
        /// Targets in the build
        total: usize,
    },

    /// The build was interrupted
    #[error("Build cancelled")]
    #[diagnostic(code(kiln::cli::cancelled))]
    Cancelled,
}

impl CliError {
    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: None,
        }
    }

    /// Create a configuration error with a suggestion
    #[must_use]
    pub fn config_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    /// Create a file read error
    #[must_use]
    pub fn file(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::File {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Create a parse error
    #[must_use]
    pub fn parse(kind: &'static str, path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self::Parse {
            kind,
            path: path.as_ref().to_path_buf(),
            message: message.into(),
        }
    }

    /// Process exit code for this error
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::BuildFailed { .. } => EXIT_BUILD_FAILED,
            Self::Cancelled => crate::shutdown::EXIT_SIGINT,
            Self::File { .. }
            | Self::Parse { .. }
            | Self::Config { .. }
            | Self::Output(_)
            | Self::Graph(_)
            | Self::Engine(kiln_engine::Error::Graph(_)) => EXIT_CLI,
            Self::Engine(_) | Self::Cache(_) | Self::Remote(_) => EXIT_BUILD_FAILED,
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
