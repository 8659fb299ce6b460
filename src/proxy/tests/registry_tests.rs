//! Integration tests: the backing registry's distribution API, driven both
//! with raw requests and with the registry client over a loopback socket.

mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use tokio::net::TcpListener;
use wrapd_proxy::BackingRegistry;
use wrapd_runtime::oci::{sha256_digest, ImageReference, ImagePublisher, RegistryPusher};

use common::*;

#[tokio::test]
async fn test_chunked_blob_upload() {
    let registry = BackingRegistry::new();
    let router = registry.router();

    let start = send(&router, Method::POST, "/v2/ns/app/blobs/uploads/").await;
    assert_eq!(start.status, StatusCode::ACCEPTED);
    let location = start.header("Location").unwrap().to_string();
    assert!(location.starts_with("/v2/ns/app/blobs/uploads/"));

    let first = send_with(
        &router,
        Request::patch(location.as_str())
            .header("Content-Range", "0-5")
            .body(Body::from("hello "))
            .unwrap(),
    )
    .await;
    assert_eq!(first.status, StatusCode::ACCEPTED);
    assert_eq!(first.header("Range"), Some("0-5"));

    let second = send_with(
        &router,
        Request::patch(location.as_str())
            .header("Content-Range", "6-10")
            .body(Body::from("world"))
            .unwrap(),
    )
    .await;
    assert_eq!(second.header("Range"), Some("0-10"));

    let status = send(&router, Method::GET, &location).await;
    assert_eq!(status.status, StatusCode::NO_CONTENT);
    assert_eq!(status.header("Range"), Some("0-10"));

    let digest = sha256_digest(b"hello world");
    let finish = send(
        &router,
        Method::PUT,
        &format!("{}?digest={}", location, digest),
    )
    .await;
    assert_eq!(finish.status, StatusCode::CREATED);
    assert_eq!(finish.header("Docker-Content-Digest"), Some(digest.as_str()));

    let blob = send(&router, Method::GET, &format!("/v2/ns/app/blobs/{}", digest)).await;
    assert_eq!(blob.status, StatusCode::OK);
    assert_eq!(blob.body.as_ref(), b"hello world");
}

#[tokio::test]
async fn test_upload_with_wrong_digest_is_rejected() {
    let registry = BackingRegistry::new();
    let router = registry.router();

    let start = send(&router, Method::POST, "/v2/ns/app/blobs/uploads/").await;
    let location = start.header("Location").unwrap().to_string();
    let finish = send_with(
        &router,
        Request::put(format!("{}?digest={}", location, sha256_digest(b"other")))
            .body(Body::from("data"))
            .unwrap(),
    )
    .await;
    assert_eq!(finish.status, StatusCode::BAD_REQUEST);
    assert_eq!(finish.json()["errors"][0]["code"], "DIGEST_INVALID");
    assert_eq!(registry.store().blob_count(), 0);
}

#[tokio::test]
async fn test_monolithic_blob_upload() {
    let registry = BackingRegistry::new();
    let router = registry.router();
    let digest = sha256_digest(b"layer bytes");

    let response = send_with(
        &router,
        Request::post(format!("/v2/ns/app/blobs/uploads/?digest={}", digest))
            .body(Body::from("layer bytes"))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status, StatusCode::CREATED);
    assert!(registry.store().has_blob(&digest));

    let head = send(&router, Method::HEAD, &format!("/v2/ns/app/blobs/{}", digest)).await;
    assert_eq!(head.status, StatusCode::OK);
    assert!(head.body.is_empty());
}

#[tokio::test]
async fn test_manifest_by_tag_and_digest() {
    let registry = BackingRegistry::new();
    let router = registry.router();
    let image = upstream_image();

    for blob in image
        .layers()
        .iter()
        .map(|l| l.data.clone())
        .chain(std::iter::once(image.config_blob().to_vec()))
    {
        let digest = sha256_digest(&blob);
        let response = send_with(
            &router,
            Request::post(format!("/v2/ns/app/blobs/uploads/?digest={}", digest))
                .body(Body::from(blob))
                .unwrap(),
        )
        .await;
        assert_eq!(response.status, StatusCode::CREATED);
    }

    let manifest = serde_json::to_vec(image.manifest()).unwrap();
    let put = send_with(
        &router,
        Request::put("/v2/ns/app/manifests/1.0")
            .header("Content-Type", "application/vnd.oci.image.manifest.v1+json")
            .body(Body::from(manifest.clone()))
            .unwrap(),
    )
    .await;
    assert_eq!(put.status, StatusCode::CREATED);
    let digest = put.header("Docker-Content-Digest").unwrap().to_string();
    assert_eq!(digest, sha256_digest(&manifest));

    let by_tag = send(&router, Method::GET, "/v2/ns/app/manifests/1.0").await;
    assert_eq!(by_tag.status, StatusCode::OK);
    assert_eq!(by_tag.body.as_ref(), manifest.as_slice());

    let by_digest = send(&router, Method::GET, &format!("/v2/ns/app/manifests/{}", digest)).await;
    assert_eq!(by_digest.status, StatusCode::OK);
    assert_eq!(by_digest.body, by_tag.body);

    let tags = send(&router, Method::GET, "/v2/ns/app/tags/list").await;
    assert_eq!(
        tags.json(),
        serde_json::json!({"name": "ns/app", "tags": ["1.0"]})
    );
}

#[tokio::test]
async fn test_manifest_with_missing_blob_is_rejected() {
    let registry = BackingRegistry::new();
    let router = registry.router();
    let manifest = serde_json::to_vec(upstream_image().manifest()).unwrap();

    let put = send_with(
        &router,
        Request::put("/v2/ns/app/manifests/1.0")
            .body(Body::from(manifest))
            .unwrap(),
    )
    .await;
    assert_eq!(put.status, StatusCode::BAD_REQUEST);
    assert_eq!(put.json()["errors"][0]["code"], "MANIFEST_BLOB_UNKNOWN");
}

#[tokio::test]
async fn test_in_process_publisher_stores_image() {
    let registry = BackingRegistry::new();
    let image = upstream_image();
    let reference = ImageReference::tagged("wrapd.local", WRAP_REPOSITORY, "latest");

    let pushed = registry
        .in_process_publisher()
        .push(&reference, &image)
        .await
        .unwrap();
    assert!(pushed.manifest_url.starts_with(&format!("/v2/{}/manifests/", WRAP_REPOSITORY)));

    let stored = registry
        .store()
        .get_manifest(WRAP_REPOSITORY, "latest")
        .unwrap();
    assert_eq!(stored.content_type, "application/vnd.oci.image.manifest.v1+json");
    assert!(registry.store().has_blob(image.config_digest()));
    assert_eq!(registry.store().blob_count(), 3);
}

#[tokio::test]
async fn test_loopback_push_with_registry_client() {
    let registry = BackingRegistry::new();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = registry.router();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let image = upstream_image();
    let reference = ImageReference::tagged(addr.to_string(), WRAP_REPOSITORY, "latest");
    RegistryPusher::insecure()
        .push(&reference, &image)
        .await
        .unwrap();

    let stored = registry
        .store()
        .get_manifest(WRAP_REPOSITORY, "latest")
        .unwrap();
    let manifest: serde_json::Value = serde_json::from_slice(&stored.data).unwrap();
    assert_eq!(manifest["config"]["digest"], image.config_digest());
    assert_eq!(manifest["layers"].as_array().unwrap().len(), 2);
    for layer in image.layers() {
        assert!(registry.store().has_blob(&layer.descriptor.digest));
    }
}
