//! Build configuration

use kiln_graph::Label;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default directory for build outputs, relative to the workspace root
pub const DEFAULT_OUTPUT_DIR: &str = "kiln-out";

/// Settings for one build invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildConfig {
    /// Number of concurrent actions; 0 uses the available parallelism
    pub jobs: usize,
    /// Keep building independent targets after a failure
    pub keep_going: bool,
    /// Root that target sources are resolved against
    pub workspace_root: PathBuf,
    /// Root of per-package output directories
    pub output_root: PathBuf,
    /// Action timeout for targets that do not set their own
    #[serde(with = "kiln_cache::serde_secs::option", skip_serializing_if = "Option::is_none")]
    pub default_timeout: Option<Duration>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            jobs: 0,
            keep_going: false,
            workspace_root: PathBuf::from("."),
            output_root: PathBuf::from(DEFAULT_OUTPUT_DIR),
            default_timeout: None,
        }
    }
}

impl BuildConfig {
    /// Set the concurrency
    #[must_use]
    pub const fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    /// Continue past failures
    #[must_use]
    pub const fn with_keep_going(mut self, keep_going: bool) -> Self {
        self.keep_going = keep_going;
        self
    }

    /// Set the workspace root
    #[must_use]
    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = root.into();
        self
    }

    /// Set the output root
    #[must_use]
    pub fn with_output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.output_root = root.into();
        self
    }

    /// Set the default action timeout
    #[must_use]
    pub const fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Number of workers to run.
    #[must_use]
    pub fn effective_jobs(&self) -> usize {
        if self.jobs > 0 {
            return self.jobs;
        }
        std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
    }

    /// Output root, resolved against the workspace root when relative.
    #[must_use]
    pub fn resolved_output_root(&self) -> PathBuf {
        if self.output_root.is_absolute() {
            self.output_root.clone()
        } else {
            self.workspace_root.join(&self.output_root)
        }
    }

    /// Directory a target's action runs in and writes its outputs to.
    #[must_use]
    pub fn output_dir(&self, label: &Label) -> PathBuf {
        package_dir(&self.resolved_output_root(), label)
    }
}

pub(crate) fn package_dir(output_root: &Path, label: &Label) -> PathBuf {
    if label.package().is_empty() {
        output_root.to_path_buf()
    } else {
        output_root.join(label.package())
    }
}
