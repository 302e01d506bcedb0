//! `kiln clean`

use crate::cli::CleanArgs;
use crate::config::KilnConfig;
use crate::errors::{CliError, Result};
use kiln_cache::{CleanStats, Cleaner};
use std::io::Write;
use tokio_util::sync::CancellationToken;

/// Run the cleaner over the local cache.
///
/// With `--once` a single pass runs and its statistics are written to `out`;
/// otherwise passes repeat on the configured interval until `shutdown`.
///
/// # Errors
///
/// Returns an error if the cache cannot be opened, the cleaner settings are
/// invalid or a single pass fails.
pub async fn run<W: Write>(
    config: KilnConfig,
    args: &CleanArgs,
    shutdown: CancellationToken,
    out: &mut W,
) -> Result<()> {
    let store = config.cache.open_store(args.cache_dir.as_deref())?;
    let mut cleaner_config = config.cleaner;
    if args.dry_run {
        cleaner_config = cleaner_config.dry_run();
    }
    let dry_run = cleaner_config.dry_run;
    let cleaner = Cleaner::new(store, cleaner_config)?;

    if !args.once {
        cleaner.run(shutdown).await;
        return Ok(());
    }

    let stats = tokio::task::spawn_blocking(move || cleaner.run_once())
        .await
        .map_err(kiln_cache::Error::from)??;
    write_stats(out, &stats, dry_run).map_err(CliError::Output)
}

fn write_stats(out: &mut impl Write, stats: &CleanStats, dry_run: bool) -> std::io::Result<()> {
    let verb = if dry_run { "would remove" } else { "removed" };
    writeln!(
        out,
        "scanned {} entries, {verb} {} ({} bytes), {} bytes -> {} bytes",
        stats.entries_scanned,
        stats.entries_removed,
        stats.bytes_freed,
        stats.initial_size,
        stats.final_size
    )?;
    if stats.entries_skipped_young > 0 {
        writeln!(out, "kept {} recently used entries", stats.entries_skipped_young)?;
    }
    if stats.temp_files_removed > 0 {
        writeln!(out, "removed {} stale temporary files", stats.temp_files_removed)?;
    }
    if stats.entries_failed > 0 {
        writeln!(out, "failed to remove {} entries", stats.entries_failed)?;
    }
    Ok(())
}
