//! `kiln build`

use crate::cli::BuildArgs;
use crate::config::{CacheSection, KilnConfig};
use crate::errors::{CliError, Result};
use crate::loader::load_graph;
use kiln_cache::{Cache, ChainCache};
use kiln_engine::{BuildConfig, BuildState, BuildSummary, HostExecutor, Scheduler, TargetResult};
use kiln_graph::{BuildGraph, Label};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Build the requested labels, streaming one line per finished target to
/// `out` and a summary line at the end.
///
/// # Errors
///
/// Returns [`CliError::BuildFailed`] if any target failed and
/// [`CliError::Cancelled`] if `shutdown` interrupted the build, besides
/// configuration, graph and cache errors raised before building.
pub async fn run<W: Write>(
    config: KilnConfig,
    args: &BuildArgs,
    shutdown: CancellationToken,
    out: &mut W,
) -> Result<BuildSummary> {
    let graph = load_graph(&args.graph)?;
    let labels = requested_labels(&graph, &args.labels)?;
    let chain = Arc::new(cache_chain(&config.cache, args.cache_dir.as_deref())?);
    let build_config = build_config(config.build, args);

    tracing::debug!(
        root = %build_config.workspace_root.display(),
        tiers = chain.tier_count(),
        "Prepared build"
    );

    let scheduler = Scheduler::new(
        Arc::new(graph),
        Arc::clone(&chain) as Arc<dyn Cache>,
        Arc::new(HostExecutor::new()),
        build_config,
    );
    let mut invocation = scheduler.start(&labels)?;

    let cancel = invocation.cancellation_token();
    let interrupt = shutdown.clone();
    let link = tokio::spawn(async move {
        interrupt.cancelled().await;
        cancel.cancel();
    });

    while let Some(result) = invocation.next().await {
        write_result(out, &result).map_err(CliError::Output)?;
    }
    let summary = invocation.finish().await;
    link.abort();
    chain.flush().await;

    write_summary(out, &summary, chain.metrics().remote_hits).map_err(CliError::Output)?;

    if summary.is_success() {
        Ok(summary)
    } else if shutdown.is_cancelled() {
        Err(CliError::Cancelled)
    } else {
        Err(CliError::BuildFailed {
            failed: summary.failed(),
            total: summary.results.len(),
        })
    }
}

/// Labels named on the command line, or every target when none are.
fn requested_labels(graph: &BuildGraph, raw: &[String]) -> Result<Vec<Label>> {
    if raw.is_empty() {
        return Ok(graph.labels().into_iter().cloned().collect());
    }
    Ok(raw
        .iter()
        .map(|label| Label::parse(label))
        .collect::<kiln_graph::Result<Vec<_>>>()?)
}

/// Apply command line overrides to the configured build settings.
fn build_config(mut config: BuildConfig, args: &BuildArgs) -> BuildConfig {
    config.workspace_root = args
        .root
        .clone()
        .unwrap_or_else(|| graph_dir(&args.graph));
    if let Some(jobs) = args.jobs {
        config.jobs = jobs;
    }
    if args.keep_going {
        config.keep_going = true;
    }
    if let Some(secs) = args.timeout {
        config.default_timeout = Some(Duration::from_secs(secs));
    }
    config
}

fn graph_dir(graph: &Path) -> PathBuf {
    match graph.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// The local store followed by every configured remote, in order.
fn cache_chain(cache: &CacheSection, dir_override: Option<&Path>) -> Result<ChainCache> {
    let store = cache.open_store(dir_override)?;
    let mut chain = ChainCache::new().with_tier(Arc::new(store), cache.mode);
    for remote in &cache.remote {
        chain.push_tier(kiln_remote::connect(remote)?, remote.mode);
    }
    Ok(chain)
}

fn status(result: &TargetResult) -> &'static str {
    match result.state {
        BuildState::CacheHit => "cached",
        BuildState::Succeeded if result.test => "passed",
        BuildState::Succeeded => "built",
        _ if result.is_cancelled() => "cancelled",
        _ => "FAILED",
    }
}

fn write_result(out: &mut impl Write, result: &TargetResult) -> std::io::Result<()> {
    let status = status(result);
    match (&result.state, &result.failure) {
        (BuildState::Succeeded, _) => writeln!(
            out,
            "{status:<9} {} ({:.2}s)",
            result.label,
            result.duration.as_secs_f64()
        ),
        (BuildState::Failed, Some(reason)) if !result.is_cancelled() => {
            writeln!(out, "{status:<9} {}: {reason}", result.label)
        }
        _ => writeln!(out, "{status:<9} {}", result.label),
    }
}

fn write_summary(out: &mut impl Write, summary: &BuildSummary, remote_hits: u64) -> std::io::Result<()> {
    write!(
        out,
        "{} targets: {} built, {} cached",
        summary.results.len(),
        summary.succeeded(),
        summary.cache_hits()
    )?;
    if remote_hits > 0 {
        write!(out, " ({remote_hits} remote)")?;
    }
    if summary.failed() > 0 {
        write!(out, ", {} failed", summary.failed())?;
    }
    writeln!(out, " in {:.2}s", summary.duration.as_secs_f64())
}
