//! Build target graph for kiln.
//!
//! This crate holds the declared build targets, links their dependencies into
//! a directed acyclic graph using petgraph, and resolves requested labels to
//! their transitive dependency closure.
//!
//! # Key Types
//!
//! - [`Label`]: the `//package:name` address of a target
//! - [`Target`] and [`Action`]: a build unit and how it is built
//! - [`Package`]: targets sharing a declaration origin
//! - [`GraphBuilder`] / [`BuildGraph`]: construction and queries
//!
//! # Example
//!
//! ```
//! use kiln_graph::{Action, BuildGraph, Label, Package, Target};
//!
//! # fn main() -> kiln_graph::Result<()> {
//! let core = Target::new(Label::parse("//lib:core")?, Action::shell("cc -c core.c"));
//! let app = Target::new(Label::parse("//app:bin")?, Action::shell("cc main.c"))
//!     .with_dep(Label::parse("//lib:core")?);
//!
//! let graph = BuildGraph::from_packages([
//!     Package::new("lib", vec![core])?,
//!     Package::new("app", vec![app])?,
//! ])?;
//!
//! let order = graph.resolve(&[Label::parse("//app:bin")?])?;
//! assert_eq!(order[0].label.to_string(), "//lib:core");
//! # Ok(())
//! # }
//! ```

mod cycle;
mod error;
mod graph;
mod label;
mod target;

pub use error::{Error, Result};
pub use graph::{BuildGraph, GraphBuilder};
pub use label::Label;
pub use target::{Action, Package, Target, check_output};
