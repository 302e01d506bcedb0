//! Cache Cleaner
//!
//! Watermark-based LRU eviction for the local store. When a pass finds the
//! store above the high-water mark it deletes least-recently-used entries
//! until usage is at or below the low-water mark, never touching entries
//! accessed within `min_age`.
//!
//! The cleaner coordinates with concurrent builds only through the
//! filesystem: an entry deleted under a reader surfaces as a miss, and an
//! entry that vanished before the cleaner reached it counts as cleaned.

use crate::local::{Scan, TEMP_PREFIX};
use crate::{Error, LocalStore, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Default high-water mark (10 GiB)
pub const DEFAULT_HIGH_WATER_MARK_BYTES: u64 = 10 * 1024 * 1024 * 1024;

/// Default low-water mark (8 GiB)
pub const DEFAULT_LOW_WATER_MARK_BYTES: u64 = 8 * 1024 * 1024 * 1024;

/// Temp files younger than this are assumed to belong to a write in progress.
const MIN_TEMP_FILE_AGE: Duration = Duration::from_secs(60 * 60);

/// Cleaner configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CleanerConfig {
    /// Eviction starts when total size exceeds this many bytes
    pub high_water_mark_bytes: u64,
    /// Eviction stops once total size is at or below this many bytes
    pub low_water_mark_bytes: u64,
    /// Entries accessed more recently than this are never evicted
    #[serde(with = "crate::serde_secs")]
    pub min_age: Duration,
    /// Time between periodic passes
    #[serde(with = "crate::serde_secs")]
    pub scan_interval: Duration,
    /// Report what would be removed without removing it
    pub dry_run: bool,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            high_water_mark_bytes: DEFAULT_HIGH_WATER_MARK_BYTES,
            low_water_mark_bytes: DEFAULT_LOW_WATER_MARK_BYTES,
            min_age: Duration::from_secs(10 * 60),
            scan_interval: Duration::from_secs(5 * 60),
            dry_run: false,
        }
    }
}

impl CleanerConfig {
    /// Set both watermarks
    #[must_use]
    pub const fn with_watermarks(mut self, high: u64, low: u64) -> Self {
        self.high_water_mark_bytes = high;
        self.low_water_mark_bytes = low;
        self
    }

    /// Set the minimum entry age
    #[must_use]
    pub const fn with_min_age(mut self, min_age: Duration) -> Self {
        self.min_age = min_age;
        self
    }

    /// Set the scan interval
    #[must_use]
    pub const fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = interval;
        self
    }

    /// Enable dry run mode
    #[must_use]
    pub const fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    /// Check the configuration for contradictions.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the low-water mark is above the
    /// high-water mark or the scan interval is zero.
    pub fn validate(&self) -> Result<()> {
        if self.low_water_mark_bytes > self.high_water_mark_bytes {
            return Err(Error::configuration(format!(
                "lowWaterMarkBytes ({}) must not exceed highWaterMarkBytes ({})",
                self.low_water_mark_bytes, self.high_water_mark_bytes
            )));
        }
        if self.scan_interval.is_zero() {
            return Err(Error::configuration("scanInterval must be greater than zero"));
        }
        Ok(())
    }
}

/// Statistics from one cleaner pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanStats {
    /// Number of entries scanned
    pub entries_scanned: usize,
    /// Number of entries removed (or that would be, in dry-run mode)
    pub entries_removed: usize,
    /// Entries that disappeared before the cleaner could remove them
    pub entries_vanished: usize,
    /// Eviction candidates skipped for being younger than `min_age`
    pub entries_skipped_young: usize,
    /// Entries whose removal failed
    pub entries_failed: usize,
    /// Stale temporary files removed
    pub temp_files_removed: usize,
    /// Bytes freed
    pub bytes_freed: u64,
    /// Cache size before the pass
    pub initial_size: u64,
    /// Cache size after the pass
    pub final_size: u64,
    /// Duration of the pass
    pub duration_ms: u64,
}

/// Handle for requesting an immediate cleaner pass.
#[derive(Debug, Clone)]
pub struct CleanerHandle {
    trigger: Arc<Notify>,
}

impl CleanerHandle {
    /// Ask the running cleaner loop to start a pass now.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }
}

/// Background evictor for a [`LocalStore`].
#[derive(Debug, Clone)]
pub struct Cleaner {
    store: LocalStore,
    config: CleanerConfig,
    trigger: Arc<Notify>,
}

impl Cleaner {
    /// Create a cleaner for `store`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` is invalid.
    pub fn new(store: LocalStore, config: CleanerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            trigger: Arc::new(Notify::new()),
        })
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &CleanerConfig {
        &self.config
    }

    /// Handle for on-demand passes.
    #[must_use]
    pub fn handle(&self) -> CleanerHandle {
        CleanerHandle {
            trigger: Arc::clone(&self.trigger),
        }
    }

    /// Run a single pass.
    ///
    /// # Errors
    ///
    /// Returns an error only if the cache root cannot be read; failures on
    /// individual entries are logged and skipped.
    pub fn run_once(&self) -> Result<CleanStats> {
        let start = Instant::now();
        let mut stats = self.clean(self.store.scan()?);
        stats.duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        tracing::debug!(?stats, "Cleaner pass complete");
        Ok(stats)
    }

    /// Sweep temp files and evict entries from an earlier scan of the store.
    ///
    /// Entries may have changed on disk since `scan` was taken; each one is
    /// checked again before it is removed.
    fn clean(&self, mut scan: Scan) -> CleanStats {
        let now = SystemTime::now();
        let mut stats = CleanStats::default();
        stats.entries_scanned = scan.entries.len();
        stats.temp_files_removed = self.sweep_temp_files(&scan.temp_files, now);

        let total: u64 = scan.entries.iter().map(|e| e.size).sum();
        stats.initial_size = total;
        let mut current = total;

        if total > self.config.high_water_mark_bytes {
            tracing::info!(
                entries = scan.entries.len(),
                size = total,
                high_water_mark = self.config.high_water_mark_bytes,
                low_water_mark = self.config.low_water_mark_bytes,
                "Cache above high-water mark, evicting"
            );

            // Least recently used first; fingerprint breaks ties deterministically
            scan.entries
                .sort_by(|a, b| (a.last_access, a.fingerprint).cmp(&(b.last_access, b.fingerprint)));

            for entry in &scan.entries {
                if current <= self.config.low_water_mark_bytes {
                    break;
                }
                if self.is_young(entry.last_access, now) {
                    stats.entries_skipped_young += 1;
                    continue;
                }

                // Re-check: a build may have read the entry since the scan
                match fs::metadata(&entry.path) {
                    Ok(meta) => {
                        let accessed = meta.modified().unwrap_or(entry.last_access);
                        if self.is_young(accessed, SystemTime::now()) {
                            stats.entries_skipped_young += 1;
                            continue;
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::NotFound => {
                        stats.entries_vanished += 1;
                        current = current.saturating_sub(entry.size);
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!(path = %entry.path.display(), error = %e, "Failed to stat cache entry");
                        stats.entries_failed += 1;
                        continue;
                    }
                }

                if self.config.dry_run {
                    tracing::info!(
                        fingerprint = %entry.fingerprint,
                        size = entry.size,
                        "[dry-run] Would remove"
                    );
                    stats.entries_removed += 1;
                    stats.bytes_freed += entry.size;
                    current = current.saturating_sub(entry.size);
                    continue;
                }

                match fs::remove_file(&entry.path) {
                    Ok(()) => {
                        tracing::debug!(
                            fingerprint = %entry.fingerprint,
                            size = entry.size,
                            "Removed cache entry"
                        );
                        stats.entries_removed += 1;
                        stats.bytes_freed += entry.size;
                        current = current.saturating_sub(entry.size);
                    }
                    Err(e) if e.kind() == ErrorKind::NotFound => {
                        stats.entries_vanished += 1;
                        current = current.saturating_sub(entry.size);
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %entry.path.display(),
                            error = %e,
                            "Failed to remove cache entry"
                        );
                        stats.entries_failed += 1;
                    }
                }
            }

            if current > self.config.low_water_mark_bytes {
                tracing::warn!(
                    size = current,
                    low_water_mark = self.config.low_water_mark_bytes,
                    skipped_young = stats.entries_skipped_young,
                    "Cache still above low-water mark after eviction"
                );
            }
        }

        stats.final_size = current;
        stats
    }

    /// Run passes on the configured interval, or when triggered through a
    /// [`CleanerHandle`], until `cancel` fires. The first pass runs
    /// immediately.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.scan_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            root = %self.store.root().display(),
            interval_secs = self.config.scan_interval.as_secs(),
            "Cache cleaner started"
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {}
                () = self.trigger.notified() => {
                    tracing::debug!("Cleaner pass requested");
                }
            }

            let cleaner = self.clone();
            match tokio::task::spawn_blocking(move || cleaner.run_once()).await {
                Ok(Ok(stats)) if stats.entries_removed > 0 || stats.entries_vanished > 0 => {
                    tracing::info!(
                        removed = stats.entries_removed,
                        vanished = stats.entries_vanished,
                        bytes_freed = stats.bytes_freed,
                        size = stats.final_size,
                        "Cache cleaner pass"
                    );
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "Cache cleaner pass failed"),
                Err(e) => tracing::warn!(error = %e, "Cache cleaner task panicked"),
            }
        }

        tracing::info!("Cache cleaner stopped");
    }

    fn is_young(&self, last_access: SystemTime, now: SystemTime) -> bool {
        now.duration_since(last_access).unwrap_or(Duration::ZERO) < self.config.min_age
    }

    fn sweep_temp_files(&self, temp_files: &[(std::path::PathBuf, SystemTime, u64)], now: SystemTime) -> usize {
        let threshold = self.config.min_age.max(MIN_TEMP_FILE_AGE);
        let mut removed = 0;
        for (path, modified, _) in temp_files {
            let age = now.duration_since(*modified).unwrap_or(Duration::ZERO);
            if age < threshold || self.config.dry_run {
                continue;
            }
            match fs::remove_file(path) {
                Ok(()) => {
                    tracing::debug!(path = %path.display(), "Removed stale temp file");
                    removed += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove temp file");
                }
            }
        }
        removed
    }
}
