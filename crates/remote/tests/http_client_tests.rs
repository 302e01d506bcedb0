//! HTTP client behavior against a mock server.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use kiln_cache::{Artifact, ArtifactFile, Cache, Error, Fingerprint};
use kiln_remote::{HttpCache, RemoteConfig};
use std::time::Duration;
use wiremock::matchers::{body_bytes, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn artifact() -> Artifact {
    Artifact::new(vec![ArtifactFile {
        path: "bin/tool".to_string(),
        data: b"#!/bin/sh\necho hi\n".to_vec(),
        executable: true,
    }])
    .unwrap()
}

fn entry_path(fp: &Fingerprint) -> String {
    format!("/cache/{}", fp.to_hex())
}

#[tokio::test]
async fn get_hit_decodes_artifact() {
    let server = MockServer::start().await;
    let fp = Fingerprint::digest(b"hit");
    Mock::given(method("GET"))
        .and(path(entry_path(&fp)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(artifact().encode().unwrap()))
        .expect(1)
        .mount(&server)
        .await;

    let cache = HttpCache::new(&RemoteConfig::new(server.uri())).unwrap();
    assert_eq!(cache.get(&fp).await.unwrap(), Some(artifact()));
}

#[tokio::test]
async fn get_404_is_miss() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let cache = HttpCache::new(&RemoteConfig::new(server.uri())).unwrap();
    assert!(cache.get(&Fingerprint::digest(b"x")).await.unwrap().is_none());
}

#[tokio::test]
async fn unexpected_status_is_protocol_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let cache = HttpCache::new(&RemoteConfig::new(server.uri())).unwrap();
    let err = cache.get(&Fingerprint::digest(b"x")).await.unwrap_err();
    assert!(matches!(err, Error::Protocol { .. }));
}

#[tokio::test]
async fn garbage_body_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"definitely not zstd".to_vec()))
        .mount(&server)
        .await;

    let cache = HttpCache::new(&RemoteConfig::new(server.uri())).unwrap();
    let err = cache.get(&Fingerprint::digest(b"x")).await.unwrap_err();
    assert!(matches!(err, Error::Malformed { .. }));
}

#[tokio::test]
async fn put_sends_encoded_artifact_with_token() {
    let server = MockServer::start().await;
    let fp = Fingerprint::digest(b"put");
    Mock::given(method("PUT"))
        .and(path(entry_path(&fp)))
        .and(header("authorization", "Bearer t0ken"))
        .and(body_bytes(artifact().encode().unwrap()))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let cache = HttpCache::new(&RemoteConfig::new(server.uri()).with_token("t0ken")).unwrap();
    cache.put(&fp, &artifact()).await.unwrap();
}

#[tokio::test]
async fn delete_accepts_missing_entry() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let cache = HttpCache::new(&RemoteConfig::new(server.uri())).unwrap();
    cache.delete(&Fingerprint::digest(b"x")).await.unwrap();
}

#[tokio::test]
async fn slow_server_times_out_as_miss() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let config = RemoteConfig::new(server.uri()).with_timeout(Duration::from_millis(200));
    let cache = HttpCache::new(&config).unwrap();
    assert!(cache.get(&Fingerprint::digest(b"x")).await.unwrap().is_none());
}

#[tokio::test]
async fn unreachable_server_is_miss() {
    // bind then drop to get a port nobody listens on
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let config = RemoteConfig::new(format!("http://127.0.0.1:{port}"))
        .with_timeout(Duration::from_secs(2));
    let cache = HttpCache::new(&config).unwrap();
    let fp = Fingerprint::digest(b"x");

    assert!(cache.get(&fp).await.unwrap().is_none());
    cache.put(&fp, &artifact()).await.unwrap();
    cache.delete(&fp).await.unwrap();
}
