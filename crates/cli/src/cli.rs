//! Command line arguments

use crate::tracing::{LogLevel, TracingFormat};
use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level command line
#[derive(Parser, Debug)]
#[command(name = "kiln", version, about = "Incremental builds with a shared artifact cache")]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Logging verbosity level.
    #[arg(
        short = 'L',
        long,
        global = true,
        help = "Set logging level",
        default_value = "warn",
        value_enum
    )]
    pub level: LogLevel,

    /// Log output format.
    #[arg(long, global = true, default_value = "compact", value_enum)]
    pub log_format: TracingFormat,

    /// Configuration file; `kiln.toml` in the working directory when omitted.
    #[arg(long, global = true, env = "KILN_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build targets and their dependencies.
    Build(BuildArgs),
    /// Evict old entries from the local cache.
    Clean(CleanArgs),
    /// Serve the local cache over HTTP and gRPC.
    Serve(ServeArgs),
}

/// Arguments for `kiln build`
#[derive(Args, Debug, Default)]
pub struct BuildArgs {
    /// Graph file to load.
    #[arg(long, short = 'g', default_value = "kiln.json", value_name = "FILE")]
    pub graph: PathBuf,

    /// Workspace root; the graph file's directory when omitted.
    #[arg(long, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Maximum concurrent actions; 0 uses every core.
    #[arg(long, short = 'j', env = "KILN_JOBS")]
    pub jobs: Option<usize>,

    /// Keep building targets that do not depend on a failure.
    #[arg(long, short = 'k')]
    pub keep_going: bool,

    /// Local cache directory.
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Default action timeout in seconds.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Labels to build; every target in the graph when omitted.
    #[arg(value_name = "LABEL")]
    pub labels: Vec<String>,
}

/// Arguments for `kiln clean`
#[derive(Args, Debug, Default)]
pub struct CleanArgs {
    /// Run a single pass and print its statistics.
    #[arg(long)]
    pub once: bool,

    /// Report what would be removed without removing anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Local cache directory.
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,
}

/// Arguments for `kiln serve`
#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// HTTP listen address.
    #[arg(long, value_name = "ADDR")]
    pub http: Option<SocketAddr>,

    /// gRPC listen address.
    #[arg(long, value_name = "ADDR")]
    pub rpc: Option<SocketAddr>,

    /// Directory to serve; the local cache directory when omitted.
    #[arg(long, value_name = "DIR")]
    pub dir: Option<PathBuf>,

    /// Bearer token clients must present.
    #[arg(long, env = "KILN_CACHE_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Do not run the cleaner alongside the servers.
    #[arg(long)]
    pub no_cleaner: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn build_defaults() {
        let cli = Cli::try_parse_from(["kiln", "build"]).unwrap();
        let Commands::Build(args) = cli.command else {
            panic!("expected build");
        };
        assert_eq!(args.graph, PathBuf::from("kiln.json"));
        assert!(args.labels.is_empty());
        assert!(!args.keep_going);
        assert_eq!(cli.level, LogLevel::Warn);
        assert_eq!(cli.log_format, TracingFormat::Compact);
    }

    #[test]
    fn build_flags_and_labels() {
        let cli = Cli::try_parse_from([
            "kiln", "build", "-k", "-j", "4", "--timeout", "30", "--level", "debug", "//lib:core",
            "//app",
        ])
        .unwrap();
        let Commands::Build(args) = cli.command else {
            panic!("expected build");
        };
        assert!(args.keep_going);
        assert_eq!(args.jobs, Some(4));
        assert_eq!(args.timeout, Some(30));
        assert_eq!(args.labels, vec!["//lib:core", "//app"]);
        assert_eq!(cli.level, LogLevel::Debug);
    }

    #[test]
    fn serve_addresses() {
        let cli = Cli::try_parse_from([
            "kiln", "serve", "--http", "127.0.0.1:7070", "--rpc", "0.0.0.0:9092", "--no-cleaner",
        ])
        .unwrap();
        let Commands::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.http, Some("127.0.0.1:7070".parse().unwrap()));
        assert_eq!(args.rpc, Some("0.0.0.0:9092".parse().unwrap()));
        assert!(args.no_cleaner);
    }

    #[test]
    fn bad_address_is_rejected() {
        assert!(Cli::try_parse_from(["kiln", "serve", "--http", "nowhere"]).is_err());
    }
}
