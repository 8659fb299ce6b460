//! wrapd - registry proxy serving wrapped images.
//!
//! Pull `/wrap/{upstream}/with/{wrapper}` from this registry and get the
//! upstream image with the wrapper's payload as its entrypoint.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use wrapd_core::config::{LogFormat, ProxyConfig, PublishTransport};
use wrapd_proxy::ProxyServer;

/// wrapd registry proxy
#[derive(Parser, Debug)]
#[command(name = "wrapd", version, about = "Registry proxy that composes wrapped images")]
struct Args {
    /// YAML configuration file.
    #[arg(long, env = "WRAPD_CONFIG")]
    config: Option<PathBuf>,

    /// Public listen address.
    #[arg(long, env = "WRAPD_LISTEN_ADDR")]
    listen_addr: Option<SocketAddr>,

    /// Loopback address of the backing registry (port 0 picks a free port).
    #[arg(long, env = "WRAPD_BACKING_ADDR")]
    backing_addr: Option<SocketAddr>,

    /// Config label naming the wrapper's injected script.
    #[arg(long, env = "WRAPD_WRAPPER_LABEL")]
    wrapper_label: Option<String>,

    /// Tag composed images are published under.
    #[arg(long, env = "WRAPD_PUBLISH_TAG")]
    publish_tag: Option<String>,

    /// How composed images reach the backing registry (loopback, in-process).
    #[arg(long, env = "WRAPD_PUBLISH_TRANSPORT")]
    publish_transport: Option<PublishTransport>,

    /// Compose each (upstream, wrapper) pair at most once at a time.
    #[arg(long, env = "WRAPD_SINGLE_FLIGHT")]
    single_flight: bool,

    /// Registry to pull over plain HTTP (repeatable).
    #[arg(long = "insecure-registry", env = "WRAPD_INSECURE_REGISTRIES", value_delimiter = ',')]
    insecure_registries: Vec<String>,

    /// Docker credential file.
    #[arg(long, env = "WRAPD_DOCKER_CONFIG")]
    docker_config: Option<String>,

    /// Prometheus metrics listen address.
    #[arg(long, env = "WRAPD_METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,

    /// Log format (text, json).
    #[arg(long, env = "WRAPD_LOG_FORMAT")]
    log_format: Option<LogFormat>,
}

impl Args {
    /// Overlay command-line and environment values onto `config`.
    fn apply(self, config: &mut ProxyConfig) {
        if let Some(addr) = self.listen_addr {
            config.listen_addr = addr;
        }
        if let Some(addr) = self.backing_addr {
            config.backing_addr = addr;
        }
        if let Some(label) = self.wrapper_label {
            config.wrapper_label = label;
        }
        if let Some(tag) = self.publish_tag {
            config.publish_tag = tag;
        }
        if let Some(transport) = self.publish_transport {
            config.publish_transport = transport;
        }
        if self.single_flight {
            config.single_flight = true;
        }
        if !self.insecure_registries.is_empty() {
            config.insecure_registries = self.insecure_registries;
        }
        if let Some(path) = self.docker_config {
            config.docker_config = Some(expand_home(&path));
        }
        if let Some(addr) = self.metrics_addr {
            config.metrics_addr = Some(addr);
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
    }
}

/// Expand a leading `~` to the home directory.
fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest),
        None => PathBuf::from(path),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = ProxyConfig::load(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    init_tracing(config.log_format);

    tracing::info!(
        version = wrapd_core::VERSION,
        listen = %config.listen_addr,
        wrapper_label = %config.wrapper_label,
        publish_tag = %config.publish_tag,
        "Starting wrapd"
    );

    ProxyServer::new(config).serve().await
}
