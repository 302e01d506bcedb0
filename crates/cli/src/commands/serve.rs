//! `kiln serve`

use crate::cli::ServeArgs;
use crate::config::KilnConfig;
use crate::errors::Result;
use kiln_cache::{Cleaner, CleanerConfig, LocalStore};
use kiln_remote::server::{ServerOptions, http, rpc};
use kiln_remote::RemoteError;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// HTTP address used when neither `--http` nor `--rpc` is given
pub const DEFAULT_HTTP_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 7070);

/// Listeners a cache server runs on.
#[derive(Debug, Default)]
pub struct Listeners {
    /// HTTP listener
    pub http: Option<TcpListener>,
    /// gRPC listener
    pub rpc: Option<TcpListener>,
}

impl Listeners {
    /// Bind the requested addresses.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Bind`] if an address cannot be bound.
    pub async fn bind(http: Option<SocketAddr>, rpc: Option<SocketAddr>) -> Result<Self> {
        let http = if http.is_none() && rpc.is_none() {
            Some(DEFAULT_HTTP_ADDR)
        } else {
            http
        };
        Ok(Self {
            http: bind(http).await?,
            rpc: bind(rpc).await?,
        })
    }
}

async fn bind(addr: Option<SocketAddr>) -> Result<Option<TcpListener>> {
    let Some(addr) = addr else {
        return Ok(None);
    };
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| RemoteError::Bind { addr, source })?;
    Ok(Some(listener))
}

/// Serve the local cache until `shutdown` fires.
///
/// # Errors
///
/// Returns an error if the store cannot be opened, an address cannot be
/// bound or a server stops with an error.
pub async fn run(config: KilnConfig, args: ServeArgs, shutdown: CancellationToken) -> Result<()> {
    let store = config.cache.open_store(args.dir.as_deref())?;
    let mut options = ServerOptions::default();
    if let Some(token) = args.token {
        options = options.with_token(token);
    }
    let listeners = Listeners::bind(args.http, args.rpc).await?;
    let cleaner = (!args.no_cleaner).then_some(config.cleaner);
    serve(store, options, listeners, cleaner, shutdown).await
}

/// Serve `store` on `listeners`, running the cleaner alongside when
/// `cleaner` is set.
///
/// A server failing stops the others.
///
/// # Errors
///
/// Returns the first server error, or an error for invalid cleaner settings.
pub async fn serve(
    store: LocalStore,
    options: ServerOptions,
    listeners: Listeners,
    cleaner: Option<CleanerConfig>,
    shutdown: CancellationToken,
) -> Result<()> {
    let cleaner = cleaner
        .map(|config| Cleaner::new(store.clone(), config))
        .transpose()?;
    let stop = shutdown.child_token();
    let mut servers = JoinSet::new();

    if let Some(listener) = listeners.http {
        let router = http::router_with_options(store.clone(), options.clone());
        servers.spawn(http::serve(listener, router, stop.clone()));
    }
    if let Some(listener) = listeners.rpc {
        let service = rpc::CacheService::with_options(store.clone(), options);
        servers.spawn(rpc::serve(listener, service, stop.clone()));
    }

    let cleaner = cleaner.map(|cleaner| {
        let token = stop.clone();
        tokio::spawn(async move { cleaner.run(token).await })
    });

    let mut first_error = None;
    while let Some(joined) = servers.join_next().await {
        let outcome = joined.unwrap_or_else(|e| Err(RemoteError::serve("cache", e.to_string())));
        if let Err(e) = outcome {
            tracing::error!(error = %e, "Cache server stopped");
            stop.cancel();
            first_error.get_or_insert(e);
        }
    }

    stop.cancel();
    if let Some(cleaner) = cleaner
        && let Err(e) = cleaner.await
    {
        tracing::warn!(error = %e, "Cache cleaner task failed");
    }

    match first_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rpc_only_skips_default_http() {
        let listeners = Listeners::bind(None, Some("127.0.0.1:0".parse().unwrap()))
            .await
            .unwrap();
        assert!(listeners.http.is_none());
        assert!(listeners.rpc.is_some());
    }

    #[tokio::test]
    async fn bind_failure_names_the_address() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();
        let err = Listeners::bind(Some(addr), None).await.unwrap_err();
        assert!(err.to_string().contains(&addr.to_string()));
    }
}
