//! Wire types for the `kiln.cache.v1.ArtifactCache` service.
//!
//! Keys are the 32 raw fingerprint bytes; values are encoded artifacts.

/// Request for `Get`.
#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct GetRequest {
    /// Fingerprint bytes.
    #[prost(bytes = "vec", tag = "1")]
    pub key: Vec<u8>,
}

/// Response for `Get`. `data` is empty when `found` is false.
#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct GetResponse {
    /// Whether the entry exists.
    #[prost(bool, tag = "1")]
    pub found: bool,
    /// Encoded artifact.
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
}

/// Request for `Put`.
#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct PutRequest {
    /// Fingerprint bytes.
    #[prost(bytes = "vec", tag = "1")]
    pub key: Vec<u8>,
    /// Encoded artifact.
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
}

/// Response for `Put`.
#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct PutResponse {
    /// Whether the entry was stored.
    #[prost(bool, tag = "1")]
    pub ok: bool,
}

/// Request for `Delete`.
#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct DeleteRequest {
    /// Fingerprint bytes.
    #[prost(bytes = "vec", tag = "1")]
    pub key: Vec<u8>,
}

/// Response for `Delete`. `ok` is false when there was nothing to delete.
#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct DeleteResponse {
    /// Whether an entry was removed.
    #[prost(bool, tag = "1")]
    pub ok: bool,
}

#[allow(
    missing_docs,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    unused_qualifications
)]
mod generated {
    include!(concat!(env!("OUT_DIR"), "/kiln.cache.v1.ArtifactCache.rs"));
}

pub use generated::{artifact_cache_client, artifact_cache_server};
