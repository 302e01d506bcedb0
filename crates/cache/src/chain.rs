//! Layered cache.
//!
//! A [`ChainCache`] consults its tiers in priority order (local first) and
//! copies a hit from a later tier back into the earlier ones. Stores go to
//! the first tier inline and to the remaining tiers in the background.
//! Backend failures never escape the chain: they are counted, logged and
//! treated as a miss or a dropped write.

use crate::backend::put_best_effort;
use crate::{Artifact, Cache, CacheMetrics, CacheMode, Fingerprint, MetricsSnapshot, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::task::TaskTracker;

struct Tier {
    backend: Arc<dyn Cache>,
    mode: CacheMode,
}

/// Cache composed of prioritized tiers.
pub struct ChainCache {
    tiers: Vec<Tier>,
    uploads: TaskTracker,
    metrics: Arc<CacheMetrics>,
}

impl ChainCache {
    /// Create a chain with no tiers. Every lookup misses.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tiers: Vec::new(),
            uploads: TaskTracker::new(),
            metrics: Arc::new(CacheMetrics::new()),
        }
    }

    /// Append a tier with lower priority than the existing ones.
    #[must_use]
    pub fn with_tier(mut self, backend: Arc<dyn Cache>, mode: CacheMode) -> Self {
        self.push_tier(backend, mode);
        self
    }

    /// Append a tier with lower priority than the existing ones.
    pub fn push_tier(&mut self, backend: Arc<dyn Cache>, mode: CacheMode) {
        tracing::debug!(backend = backend.name(), mode = ?mode, "Added cache tier");
        self.tiers.push(Tier { backend, mode });
    }

    /// Number of tiers.
    #[must_use]
    pub fn tier_count(&self) -> usize {
        self.tiers.len()
    }

    /// Current counters.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Wait for background stores to finish.
    pub async fn flush(&self) {
        self.uploads.close();
        self.uploads.wait().await;
        self.uploads.reopen();
    }

    async fn backfill(&self, hit_tier: usize, fingerprint: &Fingerprint, artifact: &Artifact) {
        for tier in self.tiers[..hit_tier].iter().filter(|t| t.mode.allows_write()) {
            if put_best_effort(tier.backend.as_ref(), fingerprint, artifact).await {
                self.metrics.record_backfill();
                tracing::debug!(
                    backend = tier.backend.name(),
                    fingerprint = %fingerprint,
                    "Back-filled cache entry"
                );
            } else {
                self.metrics.record_error();
            }
        }
    }
}

impl Default for ChainCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChainCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainCache")
            .field(
                "tiers",
                &self
                    .tiers
                    .iter()
                    .map(|t| (t.backend.name(), t.mode))
                    .collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Cache for ChainCache {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<Artifact>> {
        for (index, tier) in self.tiers.iter().enumerate() {
            if !tier.mode.allows_read() {
                continue;
            }
            match tier.backend.get(fingerprint).await {
                Ok(Some(artifact)) => {
                    self.metrics.record_hit(index, artifact.size());
                    tracing::debug!(
                        backend = tier.backend.name(),
                        fingerprint = %fingerprint,
                        "Cache hit"
                    );
                    self.backfill(index, fingerprint, &artifact).await;
                    return Ok(Some(artifact));
                }
                Ok(None) => {}
                Err(e) => {
                    self.metrics.record_error();
                    tracing::warn!(
                        backend = tier.backend.name(),
                        fingerprint = %fingerprint,
                        error = %e,
                        "Cache lookup failed, treating as miss"
                    );
                }
            }
        }
        self.metrics.record_miss();
        Ok(None)
    }

    async fn put(&self, fingerprint: &Fingerprint, artifact: &Artifact) -> Result<()> {
        for (index, tier) in self.tiers.iter().enumerate() {
            if !tier.mode.allows_write() {
                continue;
            }
            if index == 0 {
                if put_best_effort(tier.backend.as_ref(), fingerprint, artifact).await {
                    self.metrics.record_store(artifact.size());
                } else {
                    self.metrics.record_error();
                }
                continue;
            }

            let backend = Arc::clone(&tier.backend);
            let metrics = Arc::clone(&self.metrics);
            let fingerprint = *fingerprint;
            let artifact = artifact.clone();
            self.uploads.spawn(async move {
                if put_best_effort(backend.as_ref(), &fingerprint, &artifact).await {
                    metrics.record_store(artifact.size());
                } else {
                    metrics.record_error();
                }
            });
        }
        Ok(())
    }

    async fn delete(&self, fingerprint: &Fingerprint) -> Result<()> {
        for tier in self.tiers.iter().filter(|t| t.mode.allows_write()) {
            if let Err(e) = tier.backend.delete(fingerprint).await {
                self.metrics.record_error();
                tracing::warn!(
                    backend = tier.backend.name(),
                    fingerprint = %fingerprint,
                    error = %e,
                    "Cache delete failed"
                );
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "chain"
    }
}
