//! Command line interface for kiln
//!
//! The `kiln` binary has three subcommands:
//!
//! - `kiln build [LABEL...]` loads a JSON graph file, builds the requested
//!   targets through the local cache and any configured remotes, and prints
//!   one line per finished target
//! - `kiln clean` runs the watermark cleaner over the local cache, once or
//!   periodically
//! - `kiln serve` exposes the local cache over HTTP and gRPC for other
//!   machines to use as a remote
//!
//! Settings come from `kiln.toml` ([`config::KilnConfig`]); flags override
//! them. Everything here is also usable as a library, which is how the
//! integration tests drive it.

/// Command line argument definitions.
pub mod cli;
/// Subcommand implementations.
pub mod commands;
/// `kiln.toml` loading.
pub mod config;
/// Errors and exit codes.
pub mod errors;
/// Graph file loading.
pub mod loader;
/// Signal handling.
pub mod shutdown;
/// Tracing and logging configuration.
pub mod tracing;

pub use cli::{Cli, Commands};
pub use config::KilnConfig;
pub use errors::{CliError, EXIT_BUILD_FAILED, EXIT_CLI, EXIT_OK, Result};
