//! Build graph files
//!
//! A graph file is a JSON document listing packages and their targets:
//!
//! ```json
//! {
//!   "packages": [
//!     {
//!       "path": "lib",
//!       "targets": [
//!         {
//!           "name": "core",
//!           "srcs": ["core.c"],
//!           "action": { "command": "sh", "args": ["-c", "cc -c $KILN_SRCS"] },
//!           "outputs": ["core.o"]
//!         }
//!       ]
//!     },
//!     {
//!       "path": "app",
//!       "targets": [
//!         { "name": "bin", "deps": ["//lib:core"], "action": { "command": "sh", "args": ["-c", "cc $KILN_INPUTS -o bin"] }, "outputs": ["bin"] }
//!       ]
//!     }
//!   ]
//! }
//! ```
//!
//! Sources are relative to the package directory. Dependencies are absolute
//! labels or `:name` for a target in the same package.

use crate::errors::{CliError, Result};
use kiln_graph::{Action, BuildGraph, Label, Package, Target};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File looked up in the workspace root when `--graph` is not given
pub const DEFAULT_GRAPH_FILE: &str = "kiln.json";

/// A whole graph file
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GraphFile {
    /// Declared packages
    pub packages: Vec<PackageSpec>,
}

/// One package of a graph file
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageSpec {
    /// Package path relative to the workspace root; empty for the root package
    pub path: String,
    /// Targets declared by the package
    #[serde(default)]
    pub targets: Vec<TargetSpec>,
}

fn default_cacheable() -> bool {
    true
}

/// One target of a graph file
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TargetSpec {
    /// Target name within its package
    pub name: String,
    /// Sources relative to the package directory
    #[serde(default)]
    pub srcs: Vec<PathBuf>,
    /// Dependency labels
    #[serde(default)]
    pub deps: Vec<String>,
    /// Build action
    pub action: Action,
    /// Declared outputs, relative to the package output directory
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Whether results go through the cache
    #[serde(default = "default_cacheable")]
    pub cacheable: bool,
    /// Whether the target is a test
    #[serde(default)]
    pub test: bool,
    /// Configuration inputs
    #[serde(default)]
    pub config: BTreeMap<String, String>,
    /// Action timeout in seconds
    #[serde(default, with = "kiln_cache::serde_secs::option")]
    pub timeout: Option<Duration>,
}

impl TargetSpec {
    fn into_target(self, package: &str) -> kiln_graph::Result<Target> {
        let label = Label::new(package, self.name)?;
        let deps = self
            .deps
            .iter()
            .map(|dep| Label::parse_relative(dep, package))
            .collect::<kiln_graph::Result<Vec<_>>>()?;

        Ok(Target {
            label,
            sources: self
                .srcs
                .into_iter()
                .map(|src| Path::new(package).join(src))
                .collect(),
            deps,
            action: self.action,
            outputs: self.outputs,
            cacheable: self.cacheable,
            test: self.test,
            config: self.config,
            timeout: self.timeout,
        })
    }
}

impl GraphFile {
    /// Parse a graph document.
    ///
    /// # Errors
    ///
    /// Returns a parse error naming `path` if the JSON is invalid.
    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| CliError::parse("graph", path, e.to_string()))
    }

    /// Convert to packages and link them into a graph.
    ///
    /// # Errors
    ///
    /// Returns a graph error for invalid labels, duplicates, unresolved
    /// dependencies or cycles.
    pub fn into_graph(self) -> Result<BuildGraph> {
        let mut packages = Vec::with_capacity(self.packages.len());
        for spec in self.packages {
            let targets = spec
                .targets
                .into_iter()
                .map(|target| target.into_target(&spec.path))
                .collect::<kiln_graph::Result<Vec<_>>>()?;
            packages.push(Package::new(spec.path, targets)?);
        }
        Ok(BuildGraph::from_packages(packages)?)
    }
}

/// Read and link the graph file at `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed or linked.
pub fn load_graph(path: &Path) -> Result<BuildGraph> {
    let text = std::fs::read_to_string(path).map_err(|e| CliError::file(path, e))?;
    let graph = GraphFile::parse(&text, path)?.into_graph()?;
    tracing::debug!(
        path = %path.display(),
        targets = graph.len(),
        "Loaded build graph"
    );
    Ok(graph)
}
