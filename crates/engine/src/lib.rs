//! Build engine for kiln.
//!
//! Turns a [`kiln_graph::BuildGraph`] into built outputs:
//!
//! - [`Fingerprinter`] hashes a target's inputs into a cache key
//! - [`Executor`] runs a target's action; [`HostExecutor`] runs it as a
//!   local process
//! - [`Scheduler`] builds a dependency closure on a pool of workers,
//!   consulting a [`kiln_cache::Cache`] before running anything
//!
//! # Example
//!
//! ```no_run
//! use kiln_cache::LocalStore;
//! use kiln_engine::{BuildConfig, HostExecutor, Scheduler};
//! use kiln_graph::{Action, BuildGraph, Label, Package, Target};
//! use std::sync::Arc;
//!
//! # async fn example() -> miette::Result<()> {
//! let label = Label::parse("//hello:greeting")?;
//! let target = Target::new(label.clone(), Action::shell("echo hi > greeting.txt"))
//!     .with_output("greeting.txt");
//! let graph = BuildGraph::from_packages([Package::new("hello", vec![target])?])?;
//!
//! let scheduler = Scheduler::new(
//!     Arc::new(graph),
//!     Arc::new(LocalStore::open("/tmp/kiln-cache")?),
//!     Arc::new(HostExecutor::new()),
//!     BuildConfig::default().with_workspace_root("."),
//! );
//! let summary = scheduler.run(&[label]).await?;
//! assert!(summary.is_success());
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod executor;
mod fingerprint;
mod outputs;
mod scheduler;
mod state;

pub use config::{BuildConfig, DEFAULT_OUTPUT_DIR};
pub use error::{Error, ExecutionError, Result};
pub use executor::{ActionOutput, ActionRequest, DEFAULT_MAX_OUTPUT_LINES, Executor, HostExecutor};
pub use fingerprint::{FINGERPRINT_VERSION, Fingerprinter};
pub use scheduler::{BuildInvocation, BuildSummary, Scheduler, TargetResult};
pub use state::{BuildState, FailureReason};
