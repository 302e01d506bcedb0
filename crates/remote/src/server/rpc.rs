//! gRPC cache server

use super::ServerOptions;
use crate::error::{RemoteError, Result};
use crate::proto::artifact_cache_server::{ArtifactCache, ArtifactCacheServer};
use crate::proto::{DeleteRequest, DeleteResponse, GetRequest, GetResponse, PutRequest, PutResponse};
use kiln_cache::{Fingerprint, LocalStore};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};

/// `kiln.cache.v1.ArtifactCache` backed by a local store
#[derive(Debug, Clone)]
pub struct CacheService {
    store: LocalStore,
    options: ServerOptions,
}

impl CacheService {
    /// Serve `store` with default options.
    #[must_use]
    pub fn new(store: LocalStore) -> Self {
        Self::with_options(store, ServerOptions::default())
    }

    /// Serve `store`.
    #[must_use]
    pub const fn with_options(store: LocalStore, options: ServerOptions) -> Self {
        Self { store, options }
    }

    /// Wrap into a tonic service with message limits and token checks applied.
    #[must_use]
    pub fn into_server(
        self,
    ) -> tonic::service::interceptor::InterceptedService<
        ArtifactCacheServer<Self>,
        impl tonic::service::Interceptor + Clone,
    > {
        let limit = self.options.max_artifact_bytes.saturating_add(1024);
        let options = self.options.clone();
        let server = ArtifactCacheServer::new(self)
            .max_decoding_message_size(limit)
            .max_encoding_message_size(limit);

        tonic::service::interceptor::InterceptedService::new(server, move |request: Request<()>| {
            let header = request
                .metadata()
                .get("authorization")
                .and_then(|v| v.to_str().ok());
            if options.authorizes(header) {
                Ok(request)
            } else {
                Err(Status::unauthenticated("missing or invalid token"))
            }
        })
    }

    async fn blocking<T, F>(&self, f: F) -> std::result::Result<T, Status>
    where
        T: Send + 'static,
        F: FnOnce(LocalStore) -> kiln_cache::Result<T> + Send + 'static,
    {
        let store = self.store.clone();
        match tokio::task::spawn_blocking(move || f(store)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Cache store operation failed");
                Err(Status::internal(e.to_string()))
            }
            Err(e) => Err(Status::internal(e.to_string())),
        }
    }
}

fn parse_key(key: &[u8]) -> std::result::Result<Fingerprint, Status> {
    Fingerprint::from_slice(key).map_err(|e| Status::invalid_argument(e.to_string()))
}

#[tonic::async_trait]
impl ArtifactCache for CacheService {
    async fn get(
        &self,
        request: Request<GetRequest>,
    ) -> std::result::Result<Response<GetResponse>, Status> {
        let fingerprint = parse_key(&request.get_ref().key)?;
        let data = self.blocking(move |store| store.get_bytes(&fingerprint)).await?;
        tracing::debug!(fingerprint = %fingerprint, found = data.is_some(), "Get");
        Ok(Response::new(match data {
            Some(data) => GetResponse { found: true, data },
            None => GetResponse {
                found: false,
                data: Vec::new(),
            },
        }))
    }

    async fn put(
        &self,
        request: Request<PutRequest>,
    ) -> std::result::Result<Response<PutResponse>, Status> {
        let PutRequest { key, data } = request.into_inner();
        let fingerprint = parse_key(&key)?;
        let size = data.len();
        let outcome = self
            .blocking(move |store| store.put_bytes(&fingerprint, &data))
            .await?;
        tracing::debug!(fingerprint = %fingerprint, size, ?outcome, "Put");
        Ok(Response::new(PutResponse { ok: true }))
    }

    async fn delete(
        &self,
        request: Request<DeleteRequest>,
    ) -> std::result::Result<Response<DeleteResponse>, Status> {
        let fingerprint = parse_key(&request.get_ref().key)?;
        let removed = self
            .blocking(move |store| store.delete_entry(&fingerprint))
            .await?;
        tracing::debug!(fingerprint = %fingerprint, removed, "Delete");
        Ok(Response::new(DeleteResponse { ok: removed }))
    }
}

/// Serve `service` on `listener` until `shutdown` fires.
///
/// # Errors
///
/// Returns an error if the server fails while running.
pub async fn serve(
    listener: TcpListener,
    service: CacheService,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr = listener.local_addr().ok();
    tracing::info!(addr = ?addr, "gRPC cache server listening");

    tonic::transport::Server::builder()
        .add_service(service.into_server())
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
            shutdown.cancelled().await;
            tracing::info!("gRPC cache server shutting down");
        })
        .await
        .map_err(|e| RemoteError::serve("rpc", e.to_string()))
}
