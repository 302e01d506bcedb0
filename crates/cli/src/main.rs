//! kiln command line entry point

// CLI binary needs to output to stdout/stderr
#![allow(clippy::print_stdout, clippy::print_stderr)]

use clap::Parser;
use kiln_cli::tracing::{TracingConfig, init_tracing};
use kiln_cli::{Cli, EXIT_CLI, EXIT_OK, commands, shutdown};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let tracing_config = TracingConfig {
        format: cli.log_format,
        level: cli.level.into(),
        filter: None,
    };
    if let Err(e) = init_tracing(&tracing_config) {
        eprintln!("{e:?}");
        std::process::exit(EXIT_CLI);
    }

    let shutdown = shutdown::install_signal_handlers();
    let mut stdout = std::io::stdout().lock();
    let code = match commands::dispatch(cli, shutdown, &mut stdout).await {
        Ok(()) => EXIT_OK,
        Err(e) => {
            let code = e.exit_code();
            eprintln!("{:?}", miette::Report::new(e));
            code
        }
    };
    std::process::exit(code);
}
