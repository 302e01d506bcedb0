//! gRPC remote cache client

use crate::config::RemoteConfig;
use crate::error::{RemoteError, Result};
use crate::proto::artifact_cache_client::ArtifactCacheClient;
use crate::proto::{DeleteRequest, GetRequest, PutRequest};
use async_trait::async_trait;
use kiln_cache::{Artifact, Cache, Error as CacheError, Fingerprint};
use std::time::Duration;
use tonic::metadata::AsciiMetadataValue;
use tonic::service::Interceptor;
use tonic::service::interceptor::InterceptedService;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tonic::{Code, Status};

const BACKEND: &str = "rpc";

/// Adds the bearer token, if any, to every request.
#[derive(Debug, Clone)]
pub struct AuthInterceptor {
    authorization: Option<AsciiMetadataValue>,
}

impl AuthInterceptor {
    /// Create an interceptor for `token`.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is not a valid header value.
    pub fn new(token: Option<&str>) -> Result<Self> {
        let authorization = token
            .map(|t| {
                AsciiMetadataValue::try_from(format!("Bearer {t}"))
                    .map_err(|_| RemoteError::client(BACKEND, "token contains invalid characters"))
            })
            .transpose()?;
        Ok(Self { authorization })
    }
}

impl Interceptor for AuthInterceptor {
    fn call(&mut self, mut request: tonic::Request<()>) -> std::result::Result<tonic::Request<()>, Status> {
        if let Some(value) = &self.authorization {
            request.metadata_mut().insert("authorization", value.clone());
        }
        Ok(request)
    }
}

type Client = ArtifactCacheClient<InterceptedService<Channel, AuthInterceptor>>;

/// Remote cache reached over gRPC
#[derive(Debug, Clone)]
pub struct RpcCache {
    client: Client,
    url: String,
}

impl RpcCache {
    /// Create a client for the server at `config.url`.
    ///
    /// The channel connects lazily, so an unreachable server shows up as
    /// misses rather than as a construction error.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL or TLS configuration is invalid.
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let channel = create_endpoint(config)?.connect_lazy();
        let client = ArtifactCacheClient::with_interceptor(
            channel,
            AuthInterceptor::new(config.token.as_deref())?,
        )
        .max_decoding_message_size(config.max_artifact_bytes.saturating_add(1024))
        .max_encoding_message_size(config.max_artifact_bytes.saturating_add(1024));

        tracing::debug!(url = %config.url, "Created gRPC cache client");
        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }

    /// Server URL as configured
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

fn create_endpoint(config: &RemoteConfig) -> Result<Endpoint> {
    let uri = config.normalized_url();
    let mut endpoint = Endpoint::from_shared(uri.clone())
        .map_err(|e| RemoteError::invalid_url(&config.url, e.to_string()))?
        .connect_timeout(config.connect_timeout)
        .timeout(config.timeout)
        .http2_keep_alive_interval(Duration::from_secs(30))
        .keep_alive_timeout(Duration::from_secs(10))
        .keep_alive_while_idle(true);

    if uri.starts_with("https://") {
        endpoint = endpoint
            .tls_config(ClientTlsConfig::new().with_native_roots())
            .map_err(|e| RemoteError::client(BACKEND, format!("TLS configuration error: {e}")))?;
    }
    Ok(endpoint)
}

/// Statuses that mean the server could not be reached or answered too late.
const fn is_transport_status(code: Code) -> bool {
    matches!(
        code,
        Code::Unavailable | Code::DeadlineExceeded | Code::Cancelled | Code::Unknown
    )
}

/// `Ok(None)` for a transport failure (logged), `Err` for anything else.
fn degrade(operation: &str, fingerprint: &Fingerprint, status: &Status) -> kiln_cache::Result<()> {
    if is_transport_status(status.code()) {
        tracing::warn!(
            backend = BACKEND,
            operation,
            fingerprint = %fingerprint,
            code = ?status.code(),
            error = %status.message(),
            "Remote cache unreachable"
        );
        Ok(())
    } else {
        Err(CacheError::protocol(
            BACKEND,
            format!("{operation} failed with {:?}: {}", status.code(), status.message()),
        ))
    }
}

#[async_trait]
impl Cache for RpcCache {
    async fn get(&self, fingerprint: &Fingerprint) -> kiln_cache::Result<Option<Artifact>> {
        let request = GetRequest {
            key: fingerprint.as_bytes().to_vec(),
        };
        let response = match self.client.clone().get(request).await {
            Ok(response) => response.into_inner(),
            Err(status) => {
                degrade("get", fingerprint, &status)?;
                return Ok(None);
            }
        };
        if !response.found {
            return Ok(None);
        }

        let data = response.data;
        let artifact = tokio::task::spawn_blocking(move || Artifact::decode(&data)).await??;
        tracing::debug!(fingerprint = %fingerprint, files = artifact.len(), "Fetched from gRPC cache");
        Ok(Some(artifact))
    }

    async fn put(&self, fingerprint: &Fingerprint, artifact: &Artifact) -> kiln_cache::Result<()> {
        let data = {
            let artifact = artifact.clone();
            tokio::task::spawn_blocking(move || artifact.encode()).await??
        };
        let request = PutRequest {
            key: fingerprint.as_bytes().to_vec(),
            data,
        };
        match self.client.clone().put(request).await {
            Ok(response) if response.get_ref().ok => {
                tracing::debug!(fingerprint = %fingerprint, "Uploaded to gRPC cache");
                Ok(())
            }
            Ok(_) => Err(CacheError::protocol(BACKEND, "server did not store the entry")),
            Err(status) => degrade("put", fingerprint, &status),
        }
    }

    async fn delete(&self, fingerprint: &Fingerprint) -> kiln_cache::Result<()> {
        let request = DeleteRequest {
            key: fingerprint.as_bytes().to_vec(),
        };
        match self.client.clone().delete(request).await {
            Ok(_) => Ok(()),
            Err(status) => degrade("delete", fingerprint, &status),
        }
    }

    fn name(&self) -> &'static str {
        BACKEND
    }
}
