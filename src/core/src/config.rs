use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::error::{Result, WrapError};

/// Label a wrapper image uses to name its injected executable.
pub const DEFAULT_WRAPPER_LABEL: &str = "org.goci.wrapper";

/// Public listening port.
pub const DEFAULT_LISTEN_PORT: u16 = 5000;

/// Tag composed images are published under.
pub const DEFAULT_PUBLISH_TAG: &str = "latest";

/// Proxy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Address the public proxy listens on
    pub listen_addr: SocketAddr,

    /// Loopback address the backing registry listens on
    pub backing_addr: SocketAddr,

    /// Config label naming the wrapper's injected script
    pub wrapper_label: String,

    /// Tag composed images are stored under in the backing registry
    pub publish_tag: String,

    /// How composed images reach the backing registry
    pub publish_transport: PublishTransport,

    /// Serialize concurrent compositions of the same pair
    pub single_flight: bool,

    /// Registries pulled over plain HTTP
    pub insecure_registries: Vec<String>,

    /// Docker credential file (defaults to ~/.docker/config.json)
    pub docker_config: Option<PathBuf>,

    /// Optional Prometheus listener
    pub metrics_addr: Option<SocketAddr>,

    /// Log output format
    pub log_format: LogFormat,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_LISTEN_PORT)),
            // port 0 lets the OS pick a free loopback port
            backing_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            wrapper_label: DEFAULT_WRAPPER_LABEL.to_string(),
            publish_tag: DEFAULT_PUBLISH_TAG.to_string(),
            publish_transport: PublishTransport::default(),
            single_flight: false,
            insecure_registries: Vec::new(),
            docker_config: None,
            metrics_addr: None,
            log_format: LogFormat::default(),
        }
    }
}

impl ProxyConfig {
    /// Load configuration from an optional YAML file on top of the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML configuration file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            WrapError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        serde_yaml::from_str(&content).map_err(|e| {
            WrapError::Config(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Reject configurations the proxy cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.wrapper_label.trim().is_empty() {
            return Err(WrapError::Config(
                "wrapper_label must not be empty".to_string(),
            ));
        }
        if !is_valid_tag(&self.publish_tag) {
            return Err(WrapError::Config(format!(
                "publish_tag '{}' is not a valid image tag",
                self.publish_tag
            )));
        }
        Ok(())
    }

    /// Credential file to read, falling back to the docker default location.
    pub fn docker_config_path(&self) -> Option<PathBuf> {
        self.docker_config.clone().or_else(|| {
            dirs::home_dir().map(|home| home.join(".docker").join("config.json"))
        })
    }
}

/// Transport used to publish composed images into the backing registry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PublishTransport {
    /// Distribution protocol over the backing registry's loopback socket
    #[default]
    Loopback,
    /// Direct writes into the backing registry's store
    InProcess,
}

impl std::str::FromStr for PublishTransport {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "loopback" => Ok(Self::Loopback),
            "in-process" => Ok(Self::InProcess),
            _ => Err(format!(
                "unknown publish transport: '{}' (supported: loopback, in-process)",
                s
            )),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: '{}' (supported: text, json)", s)),
        }
    }
}

/// Distribution-spec tag grammar: `[A-Za-z0-9_][A-Za-z0-9._-]{0,127}`.
pub fn is_valid_tag(tag: &str) -> bool {
    let mut chars = tag.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() || c == '_' => {}
        _ => return false,
    }
    tag.len() <= 128
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}
