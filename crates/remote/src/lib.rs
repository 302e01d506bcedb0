//! Remote artifact caches for kiln
//!
//! This crate implements the two remote cache transports and their servers:
//! - [`HttpCache`]: `GET`/`PUT`/`DELETE /cache/{hex}` over HTTP
//! - [`RpcCache`]: unary `Get`/`Put`/`Delete` calls on the
//!   `kiln.cache.v1.ArtifactCache` gRPC service
//!
//! Both implement [`kiln_cache::Cache`]. An unreachable server shows up as a
//! miss (or a dropped write) with a warning, never as a build failure.

pub mod config;
pub mod error;
pub mod http;
pub mod proto;
pub mod rpc;
pub mod server;

pub use config::{DEFAULT_MAX_ARTIFACT_BYTES, Protocol, RemoteConfig};
pub use error::{RemoteError, Result};
pub use http::HttpCache;
pub use rpc::RpcCache;
pub use server::ServerOptions;

use kiln_cache::Cache;
use std::sync::Arc;

/// Create the client matching the URL scheme in `config`.
///
/// # Errors
///
/// Returns an error if the URL is invalid or the client cannot be built.
pub fn connect(config: &RemoteConfig) -> Result<Arc<dyn Cache>> {
    let cache: Arc<dyn Cache> = match config.protocol()? {
        Protocol::Http => Arc::new(HttpCache::new(config)?),
        Protocol::Rpc => Arc::new(RpcCache::new(config)?),
    };
    tracing::info!(url = %config.url, backend = cache.name(), mode = ?config.mode, "Configured remote cache");
    Ok(cache)
}
