//! Shared fixtures: in-memory images, a fake image source and request helpers.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use oci_distribution::manifest::OciDescriptor;
use parking_lot::Mutex;
use tower::ServiceExt;
use tracing_subscriber::fmt::MakeWriter;
use wrapd_core::error::{Result, WrapError};
use wrapd_proxy::{BackingRegistry, Dispatcher, DispatcherOptions};
use wrapd_runtime::oci::{
    sha256_digest, ImageConfig, ImagePublisher, ImageReference, ImageSource, Layer, OciImage,
    PushResult, OCI_LAYER_GZIP_MEDIA_TYPE,
};
use wrapd_runtime::ProxyMetrics;

pub const LABEL: &str = "org.goci.wrapper";
pub const UPSTREAM: &str = "reg.example/ns/app:1.0";
pub const WRAPPER: &str = "reg.example/ns/wrapper:latest";
pub const WRAP_REPOSITORY: &str = "wrap/reg.example/ns/app/1.0/with/reg.example/ns/wrapper/latest";
pub const WRAP_PATH: &str =
    "/v2/wrap/reg.example/ns/app/1.0/with/reg.example/ns/wrapper/latest/manifests/latest";

pub fn layer(data: &[u8]) -> Layer {
    Layer {
        descriptor: OciDescriptor {
            media_type: OCI_LAYER_GZIP_MEDIA_TYPE.to_string(),
            digest: sha256_digest(data),
            size: data.len() as i64,
            ..Default::default()
        },
        data: data.to_vec(),
    }
}

pub fn image(config: serde_json::Value, layers: Vec<Layer>) -> OciImage {
    let config: ImageConfig = serde_json::from_value(config).unwrap();
    OciImage::from_parts(&config, layers).unwrap()
}

pub fn upstream_image() -> OciImage {
    image(
        serde_json::json!({
            "architecture": "amd64",
            "os": "linux",
            "config": {"Entrypoint": ["/bin/app"], "Cmd": ["--flag"]},
            "rootfs": {"type": "layers", "diff_ids": ["sha256:u0", "sha256:u1"]},
            "history": [{"created_by": "base"}, {"created_by": "app"}]
        }),
        vec![layer(b"upstream-0"), layer(b"upstream-1")],
    )
}

pub fn wrapper_image() -> OciImage {
    image(
        serde_json::json!({
            "config": {"Labels": {LABEL: "/wrap/run.sh"}},
            "rootfs": {"type": "layers", "diff_ids": ["sha256:w0"]},
            "history": [{"created_by": "COPY run.sh /wrap/run.sh"}]
        }),
        vec![layer(b"wrapper-payload")],
    )
}

/// Image source serving a fixed set of images, counting pulls.
#[derive(Default)]
pub struct FakeSource {
    images: Mutex<HashMap<String, OciImage>>,
    pulls: AtomicUsize,
    delay: Option<Duration>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Source that knows the standard upstream and wrapper images.
    pub fn standard() -> Self {
        let source = Self::new();
        source.insert(UPSTREAM, upstream_image());
        source.insert(WRAPPER, wrapper_image());
        source
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn insert(&self, reference: &str, image: OciImage) {
        self.images.lock().insert(reference.to_string(), image);
    }

    pub fn pulls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageSource for FakeSource {
    async fn pull(&self, reference: &ImageReference) -> Result<OciImage> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.images
            .lock()
            .get(&reference.full_reference())
            .cloned()
            .ok_or_else(|| WrapError::Resolution {
                reference: reference.to_string(),
                message: "manifest unknown".to_string(),
            })
    }
}

/// Publisher that always fails.
#[derive(Default)]
pub struct FailingPublisher {
    pushes: AtomicUsize,
}

impl FailingPublisher {
    pub fn pushes(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImagePublisher for FailingPublisher {
    async fn push(&self, reference: &ImageReference, _image: &OciImage) -> Result<PushResult> {
        self.pushes.fetch_add(1, Ordering::SeqCst);
        Err(WrapError::Publish {
            reference: reference.to_string(),
            message: "connection refused".to_string(),
        })
    }
}

pub fn options(single_flight: bool) -> DispatcherOptions {
    DispatcherOptions {
        wrapper_label: LABEL.to_string(),
        publish_registry: "wrapd.local".to_string(),
        publish_tag: "latest".to_string(),
        single_flight,
    }
}

/// A dispatcher wired to a fresh backing registry.
pub struct Harness {
    pub registry: BackingRegistry,
    pub dispatcher: Arc<Dispatcher>,
    pub router: Router,
}

impl Harness {
    pub fn new(source: Arc<dyn ImageSource>, options: DispatcherOptions) -> Self {
        let registry = BackingRegistry::new();
        let publisher = Arc::new(registry.in_process_publisher());
        Self::with_publisher(registry, source, publisher, options)
    }

    pub fn with_publisher(
        registry: BackingRegistry,
        source: Arc<dyn ImageSource>,
        publisher: Arc<dyn ImagePublisher>,
        options: DispatcherOptions,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(
            options,
            registry.router(),
            source,
            publisher,
            ProxyMetrics::new().unwrap(),
        ));
        let router = Arc::clone(&dispatcher).router();
        Self {
            registry,
            dispatcher,
            router,
        }
    }
}

/// Response parts collected for assertions.
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

pub async fn send(router: &Router, method: Method, path: &str) -> TestResponse {
    send_with(router, Request::builder().method(method).uri(path).body(Body::empty()).unwrap())
        .await
}

pub async fn send_with(router: &Router, request: Request<Body>) -> TestResponse {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    TestResponse {
        status,
        headers,
        body,
    }
}

/// Log sink shared between a test and its `fmt` subscriber.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).to_string()
    }
}

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
