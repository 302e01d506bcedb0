//! Configuration types for remote cache clients

use crate::error::{RemoteError, Result};
use kiln_cache::CacheMode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default limit for a single artifact on the wire (1 GiB)
pub const DEFAULT_MAX_ARTIFACT_BYTES: usize = 1024 * 1024 * 1024;

/// Transport used to reach a remote cache, chosen by URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// `http://` or `https://`
    Http,
    /// `grpc://` or `grpcs://`
    Rpc,
}

/// Configuration for one remote cache tier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfig {
    /// Server URL (e.g., "https://cache.example.com" or "grpc://10.0.0.5:9092")
    pub url: String,

    /// Which operations this tier takes part in
    #[serde(default)]
    pub mode: CacheMode,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout", with = "kiln_cache::serde_secs")]
    pub timeout: Duration,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout", with = "kiln_cache::serde_secs")]
    pub connect_timeout: Duration,

    /// Largest artifact accepted or sent
    #[serde(default = "default_max_artifact_bytes")]
    pub max_artifact_bytes: usize,

    /// Bearer token sent with every request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl RemoteConfig {
    /// Configuration for `url` with default settings.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            mode: CacheMode::default(),
            timeout: default_timeout(),
            connect_timeout: default_connect_timeout(),
            max_artifact_bytes: default_max_artifact_bytes(),
            token: None,
        }
    }

    /// Set the access mode
    #[must_use]
    pub const fn with_mode(mut self, mode: CacheMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the request timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the bearer token
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Transport selected by the URL scheme.
    ///
    /// # Errors
    ///
    /// Returns an error if the scheme is missing or unsupported.
    pub fn protocol(&self) -> Result<Protocol> {
        let (scheme, rest) = self
            .url
            .split_once("://")
            .ok_or_else(|| RemoteError::invalid_url(&self.url, "missing scheme"))?;
        if rest.is_empty() {
            return Err(RemoteError::invalid_url(&self.url, "missing host"));
        }
        match scheme {
            "http" | "https" => Ok(Protocol::Http),
            "grpc" | "grpcs" => Ok(Protocol::Rpc),
            other => Err(RemoteError::invalid_url(
                &self.url,
                format!("unsupported scheme '{other}'"),
            )),
        }
    }

    /// URL with `grpc`/`grpcs` rewritten to the `http`/`https` form tonic expects
    /// and without a trailing slash.
    #[must_use]
    pub fn normalized_url(&self) -> String {
        let url = self.url.trim_end_matches('/');
        if let Some(rest) = url.strip_prefix("grpcs://") {
            format!("https://{rest}")
        } else if let Some(rest) = url.strip_prefix("grpc://") {
            format!("http://{rest}")
        } else {
            url.to_string()
        }
    }
}

const fn default_timeout() -> Duration {
    Duration::from_secs(60)
}

const fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

const fn default_max_artifact_bytes() -> usize {
    DEFAULT_MAX_ARTIFACT_BYTES
}
