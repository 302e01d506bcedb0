//! Cache Metrics
//!
//! Counters for cache traffic through a [`ChainCache`](crate::ChainCache).

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Cache metrics collector
#[derive(Debug, Default)]
pub struct CacheMetrics {
    /// Hits served by the first tier
    local_hits: AtomicU64,
    /// Hits served by any later tier
    remote_hits: AtomicU64,
    /// Lookups no tier could serve
    misses: AtomicU64,
    /// Backend errors downgraded to misses or dropped writes
    errors: AtomicU64,
    /// Successful stores across all tiers
    stores: AtomicU64,
    /// Entries copied into earlier tiers after a later-tier hit
    backfills: AtomicU64,
    /// Total artifact bytes returned by lookups
    bytes_read: AtomicU64,
    /// Total artifact bytes handed to stores
    bytes_written: AtomicU64,
}

/// Point-in-time copy of [`CacheMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Hits served by the first tier
    pub local_hits: u64,
    /// Hits served by any later tier
    pub remote_hits: u64,
    /// Lookups no tier could serve
    pub misses: u64,
    /// Backend errors
    pub errors: u64,
    /// Successful stores
    pub stores: u64,
    /// Back-filled entries
    pub backfills: u64,
    /// Bytes read
    pub bytes_read: u64,
    /// Bytes written
    pub bytes_written: u64,
}

impl MetricsSnapshot {
    /// Fraction of lookups that hit, or `0.0` when nothing was looked up.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let hits = self.local_hits + self.remote_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

impl CacheMetrics {
    /// Create new metrics collector
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a hit served by tier `tier` (0 is local).
    pub fn record_hit(&self, tier: usize, bytes: u64) {
        if tier == 0 {
            self.local_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.remote_hits.fetch_add(1, Ordering::Relaxed);
        }
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record a lookup that missed everywhere
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a backend error
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful store
    pub fn record_store(&self, bytes: u64) {
        self.stores.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record a back-fill into an earlier tier
    pub fn record_backfill(&self) {
        self.backfills.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot of all counters
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            local_hits: self.local_hits.load(Ordering::Relaxed),
            remote_hits: self.remote_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            backfills: self.backfills.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }
}
