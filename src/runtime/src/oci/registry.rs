//! OCI registry client for pulling and pushing images.
//!
//! Uses the `oci-distribution` crate to interact with container registries
//! (Docker Hub, GHCR, the proxy's own backing registry, ...).

use async_trait::async_trait;
use oci_distribution::client::{ClientConfig, ClientProtocol, Config, ImageLayer, PushResponse};
use oci_distribution::manifest::ImageIndexEntry;
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::Client;
use wrapd_core::error::{Result, WrapError};

use super::credentials::CredentialStore;
use super::image::{Layer, OciImage};
use super::reference::ImageReference;
use super::source::{ImagePublisher, ImageSource, PushResult};

/// Authentication credentials for a container registry.
#[derive(Debug, Clone)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    /// Create anonymous authentication (no credentials).
    pub fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
        }
    }

    /// Create basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Create authentication from environment variables.
    ///
    /// Reads `REGISTRY_USERNAME` and `REGISTRY_PASSWORD`.
    /// Falls back to anonymous if not set.
    pub fn from_env() -> Self {
        let username = std::env::var("REGISTRY_USERNAME").ok();
        let password = std::env::var("REGISTRY_PASSWORD").ok();

        if username.is_some() && password.is_some() {
            Self { username, password }
        } else {
            Self::anonymous()
        }
    }

    /// Resolve credentials for `registry`: docker config first, then env
    /// vars, then anonymous.
    pub fn resolve(store: Option<&CredentialStore>, registry: &str) -> Self {
        if let Some(store) = store {
            match store.get(registry) {
                Ok(Some((username, password))) => return Self::basic(username, password),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        registry = %registry,
                        error = %e,
                        "Ignoring unreadable docker credentials"
                    );
                }
            }
        }
        Self::from_env()
    }

    /// Whether any credentials are set.
    pub fn is_anonymous(&self) -> bool {
        self.username.is_none() || self.password.is_none()
    }

    /// Convert to oci-distribution auth type.
    fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

/// Pulls OCI images from container registries into memory.
pub struct RegistryPuller {
    client: Client,
    credentials: Option<CredentialStore>,
}

impl RegistryPuller {
    /// Create a puller that uses HTTPS everywhere and anonymous/env auth.
    pub fn new() -> Self {
        Self::with_options(None, Vec::new())
    }

    /// Create a puller that reads credentials from `credentials` and talks
    /// plain HTTP to the registries listed in `insecure_registries`.
    pub fn with_options(
        credentials: Option<CredentialStore>,
        insecure_registries: Vec<String>,
    ) -> Self {
        let protocol = if insecure_registries.is_empty() {
            ClientProtocol::Https
        } else {
            ClientProtocol::HttpsExcept(insecure_registries)
        };
        let config = ClientConfig {
            protocol,
            platform_resolver: Some(Box::new(linux_platform_resolver)),
            ..Default::default()
        };
        let client = Client::new(config);

        Self {
            client,
            credentials,
        }
    }

    /// Pull manifest, config and all layers of `reference`.
    pub async fn pull_image(&self, reference: &ImageReference) -> Result<OciImage> {
        let oci_ref = reference.to_oci_reference();
        let auth = RegistryAuth::resolve(self.credentials.as_ref(), &reference.registry);
        tracing::info!(
            reference = %reference,
            anonymous = auth.is_anonymous(),
            "Pulling image from registry"
        );
        let auth = auth.to_oci_auth();

        // Resolves multi-arch image indexes to the linux platform
        let (manifest, manifest_digest) = self
            .client
            .pull_image_manifest(&oci_ref, &auth)
            .await
            .map_err(|e| resolution(reference, format!("Failed to pull manifest: {}", e)))?;

        let mut config_blob: Vec<u8> = Vec::new();
        self.client
            .pull_blob(&oci_ref, &manifest.config, &mut config_blob)
            .await
            .map_err(|e| resolution(reference, format!("Failed to pull config blob: {}", e)))?;

        let mut layers = Vec::with_capacity(manifest.layers.len());
        for descriptor in &manifest.layers {
            tracing::debug!(
                digest = %descriptor.digest,
                size = descriptor.size,
                "Pulling layer"
            );

            let mut data: Vec<u8> = Vec::new();
            self.client
                .pull_blob(&oci_ref, descriptor, &mut data)
                .await
                .map_err(|e| {
                    resolution(
                        reference,
                        format!("Failed to pull layer {}: {}", descriptor.digest, e),
                    )
                })?;
            layers.push(Layer {
                descriptor: descriptor.clone(),
                data,
            });
        }

        tracing::info!(
            reference = %reference,
            digest = %manifest_digest,
            layers = layers.len(),
            "Image pulled successfully"
        );

        OciImage::new(manifest, config_blob, layers)
    }
}

impl Default for RegistryPuller {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageSource for RegistryPuller {
    async fn pull(&self, reference: &ImageReference) -> Result<OciImage> {
        self.pull_image(reference).await
    }
}

/// Pushes OCI images to a container registry.
pub struct RegistryPusher {
    client: Client,
    auth: RegistryAuth,
}

impl RegistryPusher {
    /// Create a pusher speaking HTTPS with anonymous authentication.
    pub fn new() -> Self {
        Self::with_protocol(ClientProtocol::Https, RegistryAuth::anonymous())
    }

    /// Create a pusher for a plain-HTTP registry, such as the loopback
    /// backing registry.
    pub fn insecure() -> Self {
        Self::with_protocol(ClientProtocol::Http, RegistryAuth::anonymous())
    }

    /// Create a pusher with an explicit protocol and authentication.
    pub fn with_protocol(protocol: ClientProtocol, auth: RegistryAuth) -> Self {
        let config = ClientConfig {
            protocol,
            ..Default::default()
        };
        let client = Client::new(config);
        Self { client, auth }
    }

    /// Push every blob of `image`, then its manifest, under `reference`.
    pub async fn push_image(
        &self,
        reference: &ImageReference,
        image: &OciImage,
    ) -> Result<PushResult> {
        let oci_ref = reference.to_oci_reference();

        tracing::info!(
            reference = %reference,
            layers = image.layers().len(),
            "Pushing image to registry"
        );

        let layers: Vec<ImageLayer> = image
            .layers()
            .iter()
            .map(|layer| {
                ImageLayer::new(
                    layer.data.clone(),
                    layer.descriptor.media_type.clone(),
                    None,
                )
            })
            .collect();
        let config = Config::new(
            image.config_blob().to_vec(),
            image.manifest().config.media_type.clone(),
            None,
        );

        let auth = self.auth.to_oci_auth();
        let response: PushResponse = self
            .client
            .push(
                &oci_ref,
                &layers,
                config,
                &auth,
                Some(image.manifest().clone()),
            )
            .await
            .map_err(|e| WrapError::Publish {
                reference: reference.to_string(),
                message: format!("Failed to push image: {}", e),
            })?;

        tracing::info!(
            reference = %reference,
            manifest_url = %response.manifest_url,
            "Image pushed successfully"
        );

        Ok(PushResult {
            config_url: response.config_url,
            manifest_url: response.manifest_url,
        })
    }
}

impl Default for RegistryPusher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImagePublisher for RegistryPusher {
    async fn push(&self, reference: &ImageReference, image: &OciImage) -> Result<PushResult> {
        self.push_image(reference, image).await
    }
}

fn resolution(reference: &ImageReference, message: String) -> WrapError {
    WrapError::Resolution {
        reference: reference.to_string(),
        message,
    }
}

/// Platform resolver that always selects linux images matching the host architecture.
///
/// Wrapped images are run as linux containers regardless of where the proxy
/// runs, so we always look for `os: "linux"` with the host's CPU architecture.
fn linux_platform_resolver(manifests: &[ImageIndexEntry]) -> Option<String> {
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    };

    manifests
        .iter()
        .find(|entry| {
            entry
                .platform
                .as_ref()
                .is_some_and(|p| p.os == "linux" && p.architecture == arch)
        })
        .map(|entry| entry.digest.clone())
}
