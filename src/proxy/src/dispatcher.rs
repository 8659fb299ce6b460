//! Request dispatcher.
//!
//! Every inbound request lands here. Wrap manifest paths must parse, whatever
//! the method. Reads of a wrap manifest make sure the composed image exists in
//! the backing registry first; everything else, and the wrap request itself
//! once composed, is forwarded to the backing registry router unchanged.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Request, State};
use axum::http::Method;
use axum::response::Response;
use axum::Router;
use dashmap::DashMap;
use tower::ServiceExt;
use wrapd_core::config::ProxyConfig;
use wrapd_core::error::Result;
use wrapd_runtime::oci::{ImageComposer, ImagePublisher, ImageReference, ImageSource};
use wrapd_runtime::{CompositionCache, ProxyMetrics};

use crate::error::error_response;
use crate::grammar::{self, ParsedWrapRequest, RouteClass};

/// Dispatcher settings.
#[derive(Debug, Clone)]
pub struct DispatcherOptions {
    /// Config label naming the wrapper's injected script
    pub wrapper_label: String,
    /// Registry host composed images are pushed to
    pub publish_registry: String,
    /// Tag composed images are pushed under
    pub publish_tag: String,
    /// Serialize concurrent compositions of the same pair
    pub single_flight: bool,
}

impl DispatcherOptions {
    /// Take the dispatcher settings from the proxy configuration.
    pub fn from_config(config: &ProxyConfig, publish_registry: impl Into<String>) -> Self {
        Self {
            wrapper_label: config.wrapper_label.clone(),
            publish_registry: publish_registry.into(),
            publish_tag: config.publish_tag.clone(),
            single_flight: config.single_flight,
        }
    }
}

/// Routes requests and composes wrapped images on first access.
pub struct Dispatcher {
    backing: Router,
    source: Arc<dyn ImageSource>,
    publisher: Arc<dyn ImagePublisher>,
    composer: ImageComposer,
    cache: CompositionCache,
    publish_registry: String,
    publish_tag: String,
    /// Per-key composition locks, present when single-flight is on.
    inflight: Option<DashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    metrics: ProxyMetrics,
}

impl Dispatcher {
    pub fn new(
        options: DispatcherOptions,
        backing: Router,
        source: Arc<dyn ImageSource>,
        publisher: Arc<dyn ImagePublisher>,
        metrics: ProxyMetrics,
    ) -> Self {
        Self {
            backing,
            source,
            publisher,
            composer: ImageComposer::new(options.wrapper_label),
            cache: CompositionCache::new(),
            publish_registry: options.publish_registry,
            publish_tag: options.publish_tag,
            inflight: options.single_flight.then(DashMap::new),
            metrics,
        }
    }

    /// Public router: every path goes through [`Dispatcher::handle`].
    pub fn router(self: Arc<Self>) -> Router {
        Router::new().fallback(dispatch).with_state(self)
    }

    /// Compositions done so far.
    pub fn cache(&self) -> &CompositionCache {
        &self.cache
    }

    /// Composition locks currently held or waited on. Always zero without
    /// single-flight.
    pub fn in_flight(&self) -> usize {
        self.inflight.as_ref().map_or(0, DashMap::len)
    }

    /// Handle one inbound request.
    pub async fn handle(&self, request: Request) -> Response {
        let path = request.uri().path().to_string();
        let class = grammar::classify(&path);
        self.metrics.record_request(class.as_str());

        if class == RouteClass::WrapManifest {
            let parsed = match grammar::parse(&path) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::debug!(
                        method = %request.method(),
                        path = %path,
                        error = %e,
                        "Rejected wrap request"
                    );
                    return error_response(&e);
                }
            };
            // only reads trigger a composition; other methods go straight through
            let reads = matches!(*request.method(), Method::GET | Method::HEAD);
            if reads {
                if let Err(e) = self.ensure_composed(&parsed).await {
                    tracing::warn!(
                        upstream = %parsed.upstream_image,
                        wrapper = %parsed.target_image,
                        requested = %parsed.reference,
                        error = %e,
                        "Wrap request failed"
                    );
                    return error_response(&e);
                }
            }
        }

        tracing::debug!(method = %request.method(), path = %path, class = %class, "Forwarding");
        self.forward(request).await
    }

    /// Make sure the composed image for `parsed` is in the backing registry.
    async fn ensure_composed(&self, parsed: &ParsedWrapRequest) -> Result<()> {
        let upstream = parsed.upstream_image.as_str();
        let wrapper = parsed.target_image.as_str();

        if self.cache.has(upstream, wrapper) {
            self.metrics.record_cache_hit();
            return Ok(());
        }

        let Some(inflight) = &self.inflight else {
            return self.compose_once(parsed).await;
        };

        let key = CompositionCache::key(upstream, wrapper);
        let lock = inflight.entry(key.clone()).or_default().clone();
        let result = {
            let _guard = lock.lock().await;
            // another request may have composed while we waited
            if self.cache.has(upstream, wrapper) {
                self.metrics.record_cache_hit();
                Ok(())
            } else {
                self.compose_once(parsed).await
            }
        };

        // the map's own handle is the last one once every waiter is done
        drop(lock);
        inflight.remove_if(&key, |_, held| Arc::strong_count(held) == 1);
        result
    }

    /// Compose, publish and record one cache miss.
    async fn compose_once(&self, parsed: &ParsedWrapRequest) -> Result<()> {
        self.metrics.record_cache_miss();
        let started = Instant::now();
        let result = self.compose_and_publish(parsed).await;
        self.metrics
            .record_composition(result.is_ok(), started.elapsed().as_secs_f64());
        result?;

        self.cache
            .set(parsed.upstream_image.as_str(), parsed.target_image.as_str());
        Ok(())
    }

    /// Pull both images, compose them and push the result.
    async fn compose_and_publish(&self, parsed: &ParsedWrapRequest) -> Result<()> {
        let upstream_ref = ImageReference::parse(&parsed.upstream_image)?;
        let wrapper_ref = ImageReference::parse(&parsed.target_image)?;

        tracing::info!(
            upstream = %upstream_ref,
            wrapper = %wrapper_ref,
            requested = %parsed.reference,
            "Composing wrapped image"
        );

        let (upstream, wrapper) = tokio::try_join!(
            self.source.pull(&upstream_ref),
            self.source.pull(&wrapper_ref)
        )?;

        let composed = self.composer.wrap(upstream, &wrapper)?;

        let target = ImageReference::tagged(
            self.publish_registry.as_str(),
            parsed.repository(),
            self.publish_tag.as_str(),
        );
        let pushed = self.publisher.push(&target, &composed).await?;

        tracing::info!(
            reference = %target,
            config = %composed.config_digest(),
            manifest_url = %pushed.manifest_url,
            layers = composed.layers().len(),
            "Wrapped image published"
        );
        Ok(())
    }

    async fn forward(&self, request: Request) -> Response {
        match self.backing.clone().oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        }
    }
}

async fn dispatch(State(dispatcher): State<Arc<Dispatcher>>, request: Request) -> Response {
    dispatcher.handle(request).await
}
