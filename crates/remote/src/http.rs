//! HTTP remote cache client
//!
//! Speaks the `/cache/{hex}` protocol: `GET` returns the encoded artifact or
//! 404, `PUT` stores the request body, `DELETE` removes the entry.

use crate::config::RemoteConfig;
use crate::error::{RemoteError, Result};
use async_trait::async_trait;
use kiln_cache::{Artifact, Cache, Error as CacheError, Fingerprint};
use reqwest::{Client, RequestBuilder, StatusCode};

const BACKEND: &str = "http";

/// Remote cache reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpCache {
    client: Client,
    base_url: String,
    token: Option<String>,
    max_artifact_bytes: usize,
}

impl HttpCache {
    /// Create a client for the server at `config.url`.
    ///
    /// No connection is made until the first request.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .user_agent(concat!("kiln/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RemoteError::client(BACKEND, e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.normalized_url(),
            token: config.token.clone(),
            max_artifact_bytes: config.max_artifact_bytes,
        })
    }

    /// Server base URL
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn entry_url(&self, fingerprint: &Fingerprint) -> String {
        format!("{}/cache/{}", self.base_url, fingerprint.to_hex())
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

/// Errors that mean "the server could not be reached in time", as opposed to
/// "the server said something we did not expect".
fn is_transport_error(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout() || err.is_request() || err.is_body()
}

fn transport_warning(operation: &str, fingerprint: &Fingerprint, err: &reqwest::Error) {
    tracing::warn!(
        backend = BACKEND,
        operation,
        fingerprint = %fingerprint,
        error = %err,
        "Remote cache unreachable"
    );
}

fn unexpected_status(operation: &str, status: StatusCode) -> CacheError {
    CacheError::protocol(BACKEND, format!("unexpected status {status} for {operation}"))
}

#[async_trait]
impl Cache for HttpCache {
    async fn get(&self, fingerprint: &Fingerprint) -> kiln_cache::Result<Option<Artifact>> {
        let request = self.authorized(self.client.get(self.entry_url(fingerprint)));
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if is_transport_error(&e) => {
                transport_warning("get", fingerprint, &e);
                return Ok(None);
            }
            Err(e) => return Err(CacheError::protocol(BACKEND, e.to_string())),
        };

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Ok(None),
            status => return Err(unexpected_status("get", status)),
        }

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) if is_transport_error(&e) => {
                transport_warning("get", fingerprint, &e);
                return Ok(None);
            }
            Err(e) => return Err(CacheError::protocol(BACKEND, e.to_string())),
        };
        if body.len() > self.max_artifact_bytes {
            return Err(CacheError::malformed(
                fingerprint.to_hex(),
                format!("artifact of {} bytes exceeds limit", body.len()),
            ));
        }

        let artifact = tokio::task::spawn_blocking(move || Artifact::decode(&body)).await??;
        tracing::debug!(fingerprint = %fingerprint, files = artifact.len(), "Fetched from HTTP cache");
        Ok(Some(artifact))
    }

    async fn put(&self, fingerprint: &Fingerprint, artifact: &Artifact) -> kiln_cache::Result<()> {
        let encoded = {
            let artifact = artifact.clone();
            tokio::task::spawn_blocking(move || artifact.encode()).await??
        };
        if encoded.len() > self.max_artifact_bytes {
            tracing::warn!(
                fingerprint = %fingerprint,
                size = encoded.len(),
                limit = self.max_artifact_bytes,
                "Artifact too large for remote cache, skipping upload"
            );
            return Ok(());
        }

        let request = self.authorized(self.client.put(self.entry_url(fingerprint)).body(encoded));
        match request.send().await {
            Ok(response) => match response.status() {
                StatusCode::OK | StatusCode::CREATED => {
                    tracing::debug!(fingerprint = %fingerprint, "Uploaded to HTTP cache");
                    Ok(())
                }
                status => Err(unexpected_status("put", status)),
            },
            Err(e) if is_transport_error(&e) => {
                transport_warning("put", fingerprint, &e);
                Ok(())
            }
            Err(e) => Err(CacheError::protocol(BACKEND, e.to_string())),
        }
    }

    async fn delete(&self, fingerprint: &Fingerprint) -> kiln_cache::Result<()> {
        let request = self.authorized(self.client.delete(self.entry_url(fingerprint)));
        match request.send().await {
            Ok(response) => match response.status() {
                StatusCode::OK | StatusCode::NOT_FOUND => Ok(()),
                status => Err(unexpected_status("delete", status)),
            },
            Err(e) if is_transport_error(&e) => {
                transport_warning("delete", fingerprint, &e);
                Ok(())
            }
            Err(e) => Err(CacheError::protocol(BACKEND, e.to_string())),
        }
    }

    fn name(&self) -> &'static str {
        BACKEND
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_url_uses_hex_key() {
        let cache = HttpCache::new(&RemoteConfig::new("http://localhost:8080/")).unwrap();
        let fp = Fingerprint::from_bytes([0xab; 32]);
        assert_eq!(
            cache.entry_url(&fp),
            format!("http://localhost:8080/cache/{}", "ab".repeat(32))
        );
    }
}
