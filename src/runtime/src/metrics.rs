//! Metrics and observability

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use wrapd_core::error::{Result, WrapError};

/// Proxy metrics, registered in a private Prometheus registry.
#[derive(Clone)]
pub struct ProxyMetrics {
    registry: Registry,
    requests: IntCounterVec,
    cache_hits: IntCounter,
    cache_misses: IntCounter,
    compositions: IntCounterVec,
    composition_seconds: Histogram,
}

impl ProxyMetrics {
    /// Create and register all metrics.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("wrapd_requests_total", "Requests by route class"),
            &["class"],
        )
        .map_err(metrics_error)?;
        let cache_hits = IntCounter::new(
            "wrapd_composition_cache_hits_total",
            "Wrap requests served from an earlier composition",
        )
        .map_err(metrics_error)?;
        let cache_misses = IntCounter::new(
            "wrapd_composition_cache_misses_total",
            "Wrap requests that required a composition",
        )
        .map_err(metrics_error)?;
        let compositions = IntCounterVec::new(
            Opts::new("wrapd_compositions_total", "Compositions by outcome"),
            &["outcome"],
        )
        .map_err(metrics_error)?;
        let composition_seconds = Histogram::with_opts(HistogramOpts::new(
            "wrapd_composition_duration_seconds",
            "Time to pull, compose and publish one image",
        ))
        .map_err(metrics_error)?;

        registry
            .register(Box::new(requests.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(cache_hits.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(cache_misses.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(compositions.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(composition_seconds.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            requests,
            cache_hits,
            cache_misses,
            compositions,
            composition_seconds,
        })
    }

    /// Count a request by its route class (`wrap`, `forward`, ...).
    pub fn record_request(&self, class: &str) {
        self.requests.with_label_values(&[class]).inc();
    }

    /// Count a composition cache hit.
    pub fn record_cache_hit(&self) {
        self.cache_hits.inc();
    }

    /// Count a composition cache miss.
    pub fn record_cache_miss(&self) {
        self.cache_misses.inc();
    }

    /// Record a finished composition.
    pub fn record_composition(&self, succeeded: bool, seconds: f64) {
        let outcome = if succeeded { "ok" } else { "failed" };
        self.compositions.with_label_values(&[outcome]).inc();
        self.composition_seconds.observe(seconds);
    }

    /// Render all metrics in the Prometheus text format.
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| WrapError::Other(e.to_string()))
    }
}

impl std::fmt::Debug for ProxyMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyMetrics").finish_non_exhaustive()
    }
}

fn metrics_error(e: prometheus::Error) -> WrapError {
    WrapError::Other(format!("metrics: {}", e))
}
