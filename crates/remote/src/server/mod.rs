//! Remote cache servers
//!
//! Both servers persist into their own [`kiln_cache::LocalStore`] and store
//! payloads as opaque bytes. Retention is the operator's concern: run a
//! [`kiln_cache::Cleaner`] against the same store to bound its size.

pub mod http;
pub mod rpc;

use crate::config::DEFAULT_MAX_ARTIFACT_BYTES;

/// Settings shared by the HTTP and gRPC servers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    /// Largest artifact accepted
    pub max_artifact_bytes: usize,
    /// Bearer token required on every request, if set
    pub token: Option<String>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            max_artifact_bytes: DEFAULT_MAX_ARTIFACT_BYTES,
            token: None,
        }
    }
}

impl ServerOptions {
    /// Require `token` on every request
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the artifact size limit
    #[must_use]
    pub const fn with_max_artifact_bytes(mut self, max: usize) -> Self {
        self.max_artifact_bytes = max;
        self
    }

    /// Whether an `authorization` header value grants access.
    pub(crate) fn authorizes(&self, header: Option<&str>) -> bool {
        match &self.token {
            None => true,
            Some(token) => header
                .and_then(|h| h.strip_prefix("Bearer "))
                .is_some_and(|presented| presented == token),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_server_authorizes_everyone() {
        let options = ServerOptions::default();
        assert!(options.authorizes(None));
        assert!(options.authorizes(Some("Bearer anything")));
    }

    #[test]
    fn token_must_match() {
        let options = ServerOptions::default().with_token("s3cret");
        assert!(options.authorizes(Some("Bearer s3cret")));
        assert!(!options.authorizes(Some("Bearer wrong")));
        assert!(!options.authorizes(Some("s3cret")));
        assert!(!options.authorizes(None));
    }
}
