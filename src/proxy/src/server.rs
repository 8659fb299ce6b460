//! Server bootstrap.
//!
//! Starts the backing registry on its loopback listener, the public proxy
//! listener and, when configured, the metrics listener.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use wrapd_core::config::{ProxyConfig, PublishTransport};
use wrapd_runtime::oci::{CredentialStore, ImagePublisher, RegistryPuller, RegistryPusher};
use wrapd_runtime::ProxyMetrics;

use crate::dispatcher::{Dispatcher, DispatcherOptions};
use crate::registry::BackingRegistry;

/// The wrapping registry proxy.
pub struct ProxyServer {
    config: ProxyConfig,
}

impl ProxyServer {
    pub fn new(config: ProxyConfig) -> Self {
        Self { config }
    }

    /// Bind every listener and serve until SIGINT/SIGTERM.
    pub async fn serve(self) -> Result<(), Box<dyn std::error::Error>> {
        let config = self.config;
        let metrics = ProxyMetrics::new()?;
        let registry = BackingRegistry::new();

        let backing_listener = TcpListener::bind(config.backing_addr).await?;
        let backing_addr = backing_listener.local_addr()?;
        let backing_router = registry.router();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(backing_listener, backing_router).await {
                tracing::error!(error = %e, "Backing registry stopped");
            }
        });
        tracing::info!(addr = %backing_addr, "Backing registry listening");

        let publisher: Arc<dyn ImagePublisher> = match config.publish_transport {
            PublishTransport::Loopback => Arc::new(RegistryPusher::insecure()),
            PublishTransport::InProcess => Arc::new(registry.in_process_publisher()),
        };
        let credentials = config.docker_config_path().map(CredentialStore::new);
        if let Some(store) = &credentials {
            tracing::debug!(path = %store.path().display(), "Registry credentials file");
        }
        let source = Arc::new(RegistryPuller::with_options(
            credentials,
            config.insecure_registries.clone(),
        ));

        let options = DispatcherOptions::from_config(&config, backing_addr.to_string());
        let dispatcher = Arc::new(Dispatcher::new(
            options,
            registry.router(),
            source,
            publisher,
            metrics.clone(),
        ));

        if let Some(metrics_addr) = config.metrics_addr {
            let metrics_listener = TcpListener::bind(metrics_addr).await?;
            let metrics_router = metrics_router(metrics);
            tokio::spawn(async move {
                if let Err(e) = axum::serve(metrics_listener, metrics_router).await {
                    tracing::error!(error = %e, "Metrics listener stopped");
                }
            });
            tracing::info!(addr = %metrics_addr, "Metrics listening");
        }

        let listener = TcpListener::bind(config.listen_addr).await?;
        tracing::info!(
            addr = %config.listen_addr,
            publish_transport = ?config.publish_transport,
            single_flight = config.single_flight,
            "wrapd listening"
        );

        axum::serve(listener, dispatcher.router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("wrapd stopped");
        Ok(())
    }
}

/// Router exposing `GET /metrics` in the Prometheus text format.
pub fn metrics_router(metrics: ProxyMetrics) -> Router {
    Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(metrics)
}

async fn render_metrics(State(metrics): State<ProxyMetrics>) -> Response {
    match metrics.render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
