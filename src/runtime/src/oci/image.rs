//! In-memory OCI image representation.
//!
//! An [`OciImage`] holds everything needed to push an image somewhere else:
//! the manifest, the raw config blob and every layer blob. The config is kept
//! as bytes and parsed on demand through [`OciImage::config_file`], so that
//! reading it is a fallible step the composer can report on.
//!
//! [`ImageConfig`] types only the fields this crate rewrites. Every other key
//! is carried through a flattened map, so untouched fields survive a
//! parse/serialize cycle unchanged. All maps are ordered, which keeps the
//! serialized config (and therefore its digest) deterministic.

use std::collections::BTreeMap;

use oci_distribution::manifest::{OciDescriptor, OciImageManifest};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use wrapd_core::error::{Result, WrapError};

/// Compute the `sha256:<hex>` digest of a blob.
pub fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

/// A layer blob together with its manifest descriptor.
#[derive(Debug, Clone)]
pub struct Layer {
    /// Descriptor as listed in the manifest
    pub descriptor: OciDescriptor,
    /// Compressed layer bytes
    pub data: Vec<u8>,
}

/// A fully materialized OCI image.
#[derive(Debug, Clone)]
pub struct OciImage {
    manifest: OciImageManifest,
    config_blob: Vec<u8>,
    layers: Vec<Layer>,
}

impl OciImage {
    /// Assemble an image from pulled parts.
    ///
    /// The layer list must line up with the manifest's layer descriptors.
    pub fn new(manifest: OciImageManifest, config_blob: Vec<u8>, layers: Vec<Layer>) -> Result<Self> {
        if manifest.layers.len() != layers.len() {
            return Err(WrapError::Other(format!(
                "manifest lists {} layers but {} were provided",
                manifest.layers.len(),
                layers.len()
            )));
        }
        Ok(Self {
            manifest,
            config_blob,
            layers,
        })
    }

    /// Build an image from a config and layers, generating the manifest.
    ///
    /// Used for images assembled locally rather than pulled.
    pub fn from_parts(config: &ImageConfig, layers: Vec<Layer>) -> Result<Self> {
        let config_blob = serde_json::to_vec(config)?;
        let manifest = OciImageManifest {
            schema_version: 2,
            media_type: Some(OCI_IMAGE_MANIFEST_MEDIA_TYPE.to_string()),
            config: OciDescriptor {
                media_type: OCI_IMAGE_CONFIG_MEDIA_TYPE.to_string(),
                digest: sha256_digest(&config_blob),
                size: config_blob.len() as i64,
                ..Default::default()
            },
            layers: layers.iter().map(|l| l.descriptor.clone()).collect(),
            ..Default::default()
        };
        Ok(Self {
            manifest,
            config_blob,
            layers,
        })
    }

    /// Image manifest.
    pub fn manifest(&self) -> &OciImageManifest {
        &self.manifest
    }

    /// Raw config blob as stored in the registry.
    pub fn config_blob(&self) -> &[u8] {
        &self.config_blob
    }

    /// Digest of the config blob.
    pub fn config_digest(&self) -> &str {
        &self.manifest.config.digest
    }

    /// Layers, bottom to top.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Parse the config blob.
    pub fn config_file(&self) -> Result<ImageConfig> {
        serde_json::from_slice(&self.config_blob).map_err(|e| {
            WrapError::Serialization(format!("Failed to parse image config: {}", e))
        })
    }

    /// Append a layer on top of the image.
    ///
    /// `diff_id` is the digest of the uncompressed layer and goes into
    /// `rootfs.diff_ids`; `history` is recorded alongside it.
    pub fn append_layer(self, layer: Layer, diff_id: String, history: History) -> Result<Self> {
        let mut config = self.config_file()?;
        if config.rootfs.diff_ids.len() != self.layers.len() {
            return Err(WrapError::Other(format!(
                "config lists {} diff_ids for {} layers",
                config.rootfs.diff_ids.len(),
                self.layers.len()
            )));
        }
        config.rootfs.diff_ids.push(diff_id);
        config.history.push(history);

        let Self {
            mut manifest,
            mut layers,
            ..
        } = self;
        manifest.layers.push(layer.descriptor.clone());
        layers.push(layer);

        Self {
            manifest,
            config_blob: Vec::new(),
            layers,
        }
        .with_config(&config)
    }

    /// Replace the config, recomputing its descriptor.
    pub fn with_config(mut self, config: &ImageConfig) -> Result<Self> {
        let config_blob = serde_json::to_vec(config)?;
        self.manifest.config.digest = sha256_digest(&config_blob);
        self.manifest.config.size = config_blob.len() as i64;
        self.config_blob = config_blob;
        Ok(self)
    }
}

/// Media type of OCI image manifests.
pub const OCI_IMAGE_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

/// Media type of OCI image configs.
pub const OCI_IMAGE_CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.image.config.v1+json";

/// Media type of gzip-compressed OCI layers.
pub const OCI_LAYER_GZIP_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

/// Image configuration (OCI `config.json` / docker image config).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Container execution parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ContainerConfig>,

    /// Layer diff ids
    #[serde(default)]
    pub rootfs: RootFs,

    /// Build history
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<History>,

    /// Everything else (architecture, os, created, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ImageConfig {
    /// Get a label value by key.
    pub fn label(&self, key: &str) -> Option<&str> {
        self.config
            .as_ref()
            .and_then(|c| c.labels.as_ref())
            .and_then(|labels| labels.get(key))
            .map(|s| s.as_str())
    }

    /// Entrypoint, empty when unset.
    pub fn entrypoint(&self) -> &[String] {
        self.config
            .as_ref()
            .and_then(|c| c.entrypoint.as_deref())
            .unwrap_or_default()
    }

    /// Default arguments, empty when unset.
    pub fn cmd(&self) -> &[String] {
        self.config
            .as_ref()
            .and_then(|c| c.cmd.as_deref())
            .unwrap_or_default()
    }
}

/// Execution parameters inside the image config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerConfig {
    #[serde(rename = "Entrypoint", default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,

    #[serde(rename = "Cmd", default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,

    #[serde(rename = "Labels", default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,

    /// Env, WorkingDir, User, ExposedPorts, ...
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Root filesystem description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootFs {
    #[serde(rename = "type", default = "default_rootfs_type")]
    pub fs_type: String,

    #[serde(default)]
    pub diff_ids: Vec<String>,
}

impl Default for RootFs {
    fn default() -> Self {
        Self {
            fs_type: default_rootfs_type(),
            diff_ids: Vec::new(),
        }
    }
}

fn default_rootfs_type() -> String {
    "layers".to_string()
}

/// One build history entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty_layer: Option<bool>,
}

impl History {
    /// Whether this entry produced a filesystem layer.
    pub fn is_empty_layer(&self) -> bool {
        self.empty_layer.unwrap_or(false)
    }
}
