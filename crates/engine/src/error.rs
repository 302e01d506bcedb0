//! Error types for the build engine

use kiln_graph::Label;
use miette::Diagnostic;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that stop a build before any action runs, or that prevent a
/// single target from being fingerprinted.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// The requested labels could not be resolved against the graph
    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] kiln_graph::Error),

    /// A declared source could not be read
    #[error("Cannot read source {} of {label}", path.display())]
    #[diagnostic(
        code(kiln::engine::source),
        help("Declared sources are resolved relative to the workspace root")
    )]
    Source {
        /// Target declaring the source
        label: Label,
        /// Resolved path
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A dependency's fingerprint was not supplied
    #[error("Fingerprint of {dependency} is required to fingerprint {label}")]
    #[diagnostic(code(kiln::engine::missing_dependency_fingerprint))]
    MissingDependencyFingerprint {
        /// Target being fingerprinted
        label: Label,
        /// Dependency without a fingerprint
        dependency: Label,
    },

    /// Canonical serialization failed
    #[error("Serialization error: {message}")]
    #[diagnostic(code(kiln::engine::serialization))]
    Serialization {
        /// Error message
        message: String,
    },

    /// Invalid build configuration
    #[error("Build configuration error: {message}")]
    #[diagnostic(code(kiln::engine::config))]
    Configuration {
        /// Error message
        message: String,
    },
}

impl Error {
    /// Create a source read error
    #[must_use]
    pub fn unreadable_source(label: &Label, path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Source {
            label: label.clone(),
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Create a serialization error
    #[must_use]
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Why an executor could not produce a target's outputs
#[derive(Error, Debug, Diagnostic)]
pub enum ExecutionError {
    /// The action has no command
    #[error("Action for {label} has an empty command")]
    #[diagnostic(code(kiln::engine::empty_command))]
    EmptyCommand {
        /// Target label
        label: Label,
    },

    /// The process could not be started
    #[error("Failed to spawn '{command}' for {label}")]
    #[diagnostic(
        code(kiln::engine::spawn),
        help("Check that the command exists on PATH")
    )]
    Spawn {
        /// Target label
        label: Label,
        /// Command that failed to start
        command: String,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The action ran and reported failure
    #[error("{summary}")]
    #[diagnostic(code(kiln::engine::action_failed))]
    Failed {
        /// Target label
        label: Label,
        /// Exit code, if the process exited normally
        code: Option<i32>,
        /// Exit status and the tail of the captured output
        summary: String,
    },

    /// The action succeeded but did not produce a declared output
    #[error("{label} did not produce declared output '{output}'")]
    #[diagnostic(code(kiln::engine::missing_output))]
    MissingOutput {
        /// Target label
        label: Label,
        /// Declared output path
        output: String,
    },

    /// A declared output would resolve outside the target's output directory
    #[error("{label} declares invalid output '{output}': {reason}")]
    #[diagnostic(code(kiln::engine::invalid_output))]
    InvalidOutput {
        /// Target label
        label: Label,
        /// Declared output path
        output: String,
        /// Why the path was refused
        reason: &'static str,
    },

    /// Preparing the output directory failed
    #[error("I/O {operation} failed: {}", path.display())]
    #[diagnostic(code(kiln::engine::io))]
    Io {
        /// Path involved
        path: PathBuf,
        /// Operation that failed
        operation: String,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl ExecutionError {
    /// Create an I/O error
    #[must_use]
    pub fn io(source: std::io::Error, path: impl AsRef<Path>, operation: impl Into<String>) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            operation: operation.into(),
            source,
        }
    }
}
