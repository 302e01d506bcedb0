//! Generates the `kiln.cache.v1.ArtifactCache` gRPC client and server.
//!
//! Message types are hand-written `prost` structs in `src/proto.rs`, so the
//! service is described with tonic-build's manual builder and no `protoc`
//! is needed at build time.

use tonic_build::manual::{Builder, Method, Service};

fn unary(name: &str, route: &str, message: &str) -> Method {
    Method::builder()
        .name(name)
        .route_name(route)
        .input_type(format!("crate::proto::{message}Request"))
        .output_type(format!("crate::proto::{message}Response"))
        .codec_path("tonic::codec::ProstCodec")
        .build()
}

fn main() {
    let service = Service::builder()
        .name("ArtifactCache")
        .package("kiln.cache.v1")
        .method(unary("get", "Get", "Get"))
        .method(unary("put", "Put", "Put"))
        .method(unary("delete", "Delete", "Delete"))
        .build();

    Builder::new().compile(&[service]);
}
