//! Content-addressed artifact caching for kiln
//!
//! This crate provides the storage side of incremental builds:
//! - [`Fingerprint`]: the 32-byte content address of a build result
//! - [`Artifact`]: the files a target produced, in a deterministic archive encoding
//! - [`LocalStore`]: sharded on-disk storage with atomic writes
//! - [`ChainCache`]: prioritized tiers with back-fill into earlier tiers
//! - [`Cleaner`]: watermark-based LRU eviction for the local store
//!
//! # Overview
//!
//! Every backend implements the [`Cache`] trait. Failures are reported as
//! [`Error`] values but the chain and the helpers in this crate degrade
//! them to misses and dropped writes, so a broken cache can slow a build
//! down but never fail it.
//!
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> kiln_cache::Result<()> {
//! use kiln_cache::{Artifact, ArtifactFile, Cache, Fingerprint, LocalStore};
//!
//! let dir = tempfile::tempdir().map_err(|e| kiln_cache::Error::io_no_path(e, "tempdir"))?;
//! let store = LocalStore::open(dir.path())?;
//! let artifact = Artifact::new(vec![ArtifactFile {
//!     path: "out/hello.txt".to_string(),
//!     data: b"hello".to_vec(),
//!     executable: false,
//! }])?;
//!
//! let fp = Fingerprint::digest(b"example");
//! store.put(&fp, &artifact).await?;
//! assert_eq!(store.get(&fp).await?, Some(artifact));
//! # Ok(())
//! # }
//! ```

mod artifact;
mod backend;
mod chain;
mod cleaner;
mod error;
mod fingerprint;
mod local;
mod memory;
mod metrics;
mod root;
pub mod serde_secs;

pub use artifact::{Artifact, ArtifactFile};
pub use backend::{Cache, CacheMode, delete_best_effort, get_or_miss, put_best_effort};
pub use chain::ChainCache;
pub use cleaner::{
    CleanStats, Cleaner, CleanerConfig, CleanerHandle, DEFAULT_HIGH_WATER_MARK_BYTES,
    DEFAULT_LOW_WATER_MARK_BYTES,
};
pub use error::{Error, Result};
pub use fingerprint::{FINGERPRINT_LEN, Fingerprint};
pub use local::{CacheEntry, LocalStore, PutOutcome};
pub use memory::MemoryCache;
pub use metrics::{CacheMetrics, MetricsSnapshot};
pub use root::{CACHE_DIR_ENV, default_cache_root};
