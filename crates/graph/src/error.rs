//! Error types for build graph construction and resolution.

use crate::Label;
use miette::Diagnostic;
use thiserror::Error;

/// Result type for graph operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Load-time errors. All of them abort a build before any action runs.
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum Error {
    /// A label string could not be parsed.
    #[error("invalid label '{label}': {reason}")]
    #[diagnostic(
        code(kiln::graph::invalid_label),
        help("labels look like //path/to/package:name")
    )]
    InvalidLabel {
        /// The offending label text.
        label: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Two targets share a label.
    #[error("duplicate target label {label}")]
    #[diagnostic(code(kiln::graph::duplicate_label))]
    DuplicateLabel {
        /// The colliding label.
        label: Label,
    },

    /// The same package path was added twice.
    #[error("package '{path}' has already been loaded")]
    #[diagnostic(code(kiln::graph::duplicate_package))]
    DuplicatePackage {
        /// The package path.
        path: String,
    },

    /// A package contains a target labelled with a different package.
    #[error("target {label} does not belong to package '{package}'")]
    #[diagnostic(code(kiln::graph::foreign_target))]
    ForeignTarget {
        /// Label of the misplaced target.
        label: Label,
        /// Package that declared it.
        package: String,
    },

    /// A declared output does not name a path inside the target's output
    /// directory.
    #[error("{label} declares invalid output '{output}': {reason}")]
    #[diagnostic(
        code(kiln::graph::invalid_output),
        help("outputs are relative paths such as 'bin' or 'gen/api.rs'")
    )]
    InvalidOutput {
        /// Target declaring the output.
        label: Label,
        /// The declared path.
        output: String,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// A target depends on a label that is not in the graph.
    #[error("{target} depends on unknown target {dependency}{}", more(.additional))]
    #[diagnostic(
        code(kiln::graph::unresolved_dependency),
        help("check the dependency label, or load the package that declares it")
    )]
    UnresolvedDependency {
        /// Target declaring the dependency.
        target: Label,
        /// The missing dependency.
        dependency: Label,
        /// How many other unresolved dependencies were found.
        additional: usize,
    },

    /// A requested target is not in the graph.
    #[error("no such target {label}")]
    #[diagnostic(code(kiln::graph::unknown_target))]
    UnknownTarget {
        /// The requested label.
        label: Label,
    },

    /// The dependency declarations form a cycle.
    #[error("dependency cycle detected: {}", render_path(.path))]
    #[diagnostic(
        code(kiln::graph::cycle),
        help("each target in the path depends on the next one")
    )]
    CycleDetected {
        /// The cycle, starting and ending at the same label.
        path: Vec<Label>,
    },
}

fn more(additional: &usize) -> String {
    match *additional {
        0 => String::new(),
        1 => " (and 1 more unresolved dependency)".to_string(),
        n => format!(" (and {n} more unresolved dependencies)"),
    }
}

fn render_path(path: &[Label]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}
