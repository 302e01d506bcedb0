//! Targets, their build actions, and the packages that declare them.

use crate::{Error, Label, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

/// Description of how a target is built.
///
/// The graph and scheduler never interpret an action; it is handed to the
/// executor as-is and folded into the target's fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    /// Program to run.
    pub command: String,
    /// Arguments passed to the program.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables set for the action.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Action {
    /// Create an action running `command` with `args`.
    pub fn new<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: BTreeMap::new(),
        }
    }

    /// Shell action, run through `sh -c`.
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh", ["-c".to_string(), script.into()])
    }

    /// Add an environment variable to the action.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// A named, addressable build unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Unique label.
    pub label: Label,
    /// Source inputs, relative to the workspace root, in declared order.
    pub sources: Vec<PathBuf>,
    /// Labels of the targets this one depends on, in declared order.
    pub deps: Vec<Label>,
    /// Build action.
    pub action: Action,
    /// Output paths produced by the action, relative to the target's output directory.
    pub outputs: Vec<String>,
    /// Whether results may be stored in and served from the cache.
    pub cacheable: bool,
    /// Whether this target is a test.
    pub test: bool,
    /// Declared configuration inputs that affect the output (platform, mode, ...).
    pub config: BTreeMap<String, String>,
    /// Limit on the action's run time; falls back to the build default.
    pub timeout: Option<Duration>,
}

impl Target {
    /// Create a cacheable target with no inputs.
    #[must_use]
    pub fn new(label: Label, action: Action) -> Self {
        Self {
            label,
            sources: Vec::new(),
            deps: Vec::new(),
            action,
            outputs: Vec::new(),
            cacheable: true,
            test: false,
            config: BTreeMap::new(),
            timeout: None,
        }
    }

    /// Add a source input.
    #[must_use]
    pub fn with_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.sources.push(path.into());
        self
    }

    /// Add a dependency.
    #[must_use]
    pub fn with_dep(mut self, dep: Label) -> Self {
        self.deps.push(dep);
        self
    }

    /// Add a declared output path.
    #[must_use]
    pub fn with_output(mut self, path: impl Into<String>) -> Self {
        self.outputs.push(path.into());
        self
    }

    /// Add a configuration input.
    #[must_use]
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// Set the action timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Mark the target as a test.
    #[must_use]
    pub const fn as_test(mut self) -> Self {
        self.test = true;
        self
    }

    /// Never serve or store this target's results through the cache.
    #[must_use]
    pub const fn uncacheable(mut self) -> Self {
        self.cacheable = false;
        self
    }
}

/// Targets sharing a declaration origin.
///
/// A package is immutable once constructed; the graph takes ownership of
/// its targets when the package is added.
#[derive(Debug, Clone)]
pub struct Package {
    path: String,
    targets: Vec<Target>,
}

impl Package {
    /// Create a package, checking that every target's label belongs to it
    /// and that every declared output stays inside the output directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLabel`] for a malformed path,
    /// [`Error::ForeignTarget`] for a target labelled with another package
    /// and [`Error::InvalidOutput`] for an empty, absolute or escaping output.
    pub fn new(path: impl Into<String>, targets: Vec<Target>) -> Result<Self> {
        let path = path.into();
        crate::label::validate_package(&path).map_err(|reason| Error::InvalidLabel {
            label: format!("//{path}"),
            reason: reason.to_string(),
        })?;

        if let Some(target) = targets.iter().find(|t| t.label.package() != path) {
            return Err(Error::ForeignTarget {
                label: target.label.clone(),
                package: path,
            });
        }

        for target in &targets {
            for output in &target.outputs {
                check_output(output).map_err(|reason| Error::InvalidOutput {
                    label: target.label.clone(),
                    output: output.clone(),
                    reason,
                })?;
            }
        }

        Ok(Self { path, targets })
    }

    /// Package path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Targets declared by this package.
    #[must_use]
    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub(crate) fn into_targets(self) -> Vec<Target> {
        self.targets
    }
}

/// Check that `output` names a path strictly below the directory it is
/// resolved against.
///
/// # Errors
///
/// Returns the reason the path is rejected.
pub fn check_output(output: &str) -> std::result::Result<(), &'static str> {
    if output.is_empty() {
        return Err("output path is empty");
    }
    let mut named = false;
    for component in Path::new(output).components() {
        match component {
            Component::Normal(_) => named = true,
            Component::CurDir => {}
            Component::ParentDir => return Err("output path may not contain '..'"),
            Component::RootDir | Component::Prefix(_) => {
                return Err("output path must be relative");
            }
        }
    }
    if named {
        Ok(())
    } else {
        Err("output path names the output directory itself")
    }
}
