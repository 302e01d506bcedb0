//! Cache Backend Abstraction
//!
//! Defines the [`Cache`] trait shared by the local store, the remote
//! clients and the chain that composes them, plus helpers that apply the
//! best-effort contract: a failed lookup is a miss, a failed write is
//! logged and dropped.

use crate::{Artifact, Fingerprint, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Artifact storage keyed by fingerprint.
///
/// Implementations must be thread-safe (`Send + Sync`) for concurrent builds.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Fetch the artifact stored under `fingerprint`, or `None` on a miss.
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<Artifact>>;

    /// Store `artifact` under `fingerprint`.
    ///
    /// # Errors
    /// Returns error if storage fails (callers should handle gracefully)
    async fn put(&self, fingerprint: &Fingerprint, artifact: &Artifact) -> Result<()>;

    /// Remove the entry for `fingerprint`. Removing a missing entry succeeds.
    async fn delete(&self, fingerprint: &Fingerprint) -> Result<()>;

    /// Backend name for logging and metrics.
    fn name(&self) -> &'static str;
}

/// Which operations a cache backend takes part in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheMode {
    /// Reads and writes.
    #[default]
    ReadWrite,
    /// Lookups only; never written.
    ReadOnly,
    /// Written but never consulted.
    WriteOnly,
    /// Ignored entirely.
    Disabled,
}

impl CacheMode {
    /// Whether lookups are allowed.
    #[must_use]
    pub const fn allows_read(self) -> bool {
        matches!(self, Self::ReadWrite | Self::ReadOnly)
    }

    /// Whether stores and deletes are allowed.
    #[must_use]
    pub const fn allows_write(self) -> bool {
        matches!(self, Self::ReadWrite | Self::WriteOnly)
    }
}

/// Look up `fingerprint`, treating any error as a miss.
pub async fn get_or_miss(cache: &dyn Cache, fingerprint: &Fingerprint) -> Option<Artifact> {
    match cache.get(fingerprint).await {
        Ok(found) => found,
        Err(e) => {
            tracing::warn!(
                backend = cache.name(),
                fingerprint = %fingerprint,
                error = %e,
                "Cache lookup failed, treating as miss"
            );
            None
        }
    }
}

/// Store `artifact`, logging and discarding any error.
///
/// Returns whether the store succeeded.
pub async fn put_best_effort(
    cache: &dyn Cache,
    fingerprint: &Fingerprint,
    artifact: &Artifact,
) -> bool {
    match cache.put(fingerprint, artifact).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(
                backend = cache.name(),
                fingerprint = %fingerprint,
                error = %e,
                "Cache store failed, continuing without caching"
            );
            false
        }
    }
}

/// Delete `fingerprint`, logging and discarding any error.
pub async fn delete_best_effort(cache: &dyn Cache, fingerprint: &Fingerprint) -> bool {
    match cache.delete(fingerprint).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(
                backend = cache.name(),
                fingerprint = %fingerprint,
                error = %e,
                "Cache delete failed"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    struct Broken;

    #[async_trait]
    impl Cache for Broken {
        async fn get(&self, _: &Fingerprint) -> Result<Option<Artifact>> {
            Err(Error::unavailable("broken", "connection refused"))
        }

        async fn put(&self, _: &Fingerprint, _: &Artifact) -> Result<()> {
            Err(Error::unavailable("broken", "connection refused"))
        }

        async fn delete(&self, _: &Fingerprint) -> Result<()> {
            Err(Error::protocol("broken", "unexpected status 500"))
        }

        fn name(&self) -> &'static str {
            "broken"
        }
    }

    #[test]
    fn test_mode_allows_read() {
        assert!(CacheMode::ReadWrite.allows_read());
        assert!(CacheMode::ReadOnly.allows_read());
        assert!(!CacheMode::WriteOnly.allows_read());
        assert!(!CacheMode::Disabled.allows_read());
    }

    #[test]
    fn test_mode_allows_write() {
        assert!(CacheMode::ReadWrite.allows_write());
        assert!(!CacheMode::ReadOnly.allows_write());
        assert!(CacheMode::WriteOnly.allows_write());
        assert!(!CacheMode::Disabled.allows_write());
    }

    #[test]
    fn mode_uses_kebab_case() {
        let mode: CacheMode = serde_json::from_str("\"read-only\"").unwrap();
        assert_eq!(mode, CacheMode::ReadOnly);
    }

    #[tokio::test]
    async fn errors_degrade_to_miss_and_no_op() {
        let fp = Fingerprint::digest(b"x");
        assert!(get_or_miss(&Broken, &fp).await.is_none());
        assert!(!put_best_effort(&Broken, &fp, &Artifact::default()).await);
        assert!(!delete_best_effort(&Broken, &fp).await);
    }
}
