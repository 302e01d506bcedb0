//! Subcommand implementations
//!
//! Each command takes the loaded configuration, its parsed arguments and the
//! process shutdown token. Reports go to the writer passed in; logs go
//! through tracing.

pub mod build;
pub mod clean;
pub mod serve;

use crate::cli::{Cli, Commands};
use crate::config::KilnConfig;
use crate::errors::Result;
use std::io::Write;
use tokio_util::sync::CancellationToken;

/// Run the parsed command line to completion.
///
/// # Errors
///
/// Returns the first error the command hits, or a build outcome error.
pub async fn dispatch<W: Write>(cli: Cli, shutdown: CancellationToken, out: &mut W) -> Result<()> {
    let config = KilnConfig::load(cli.config.as_deref())?;
    match cli.command {
        Commands::Build(args) => build::run(config, &args, shutdown, out).await.map(|_| ()),
        Commands::Clean(args) => clean::run(config, &args, shutdown, out).await,
        Commands::Serve(args) => serve::run(config, args, shutdown).await,
    }
}
