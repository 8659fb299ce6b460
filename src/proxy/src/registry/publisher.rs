//! Publishing straight into the backing store, without a socket.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use wrapd_core::error::{Result, WrapError};
use wrapd_runtime::oci::{
    ImagePublisher, ImageReference, OciImage, PushResult, OCI_IMAGE_MANIFEST_MEDIA_TYPE,
};

use super::error::OciError;
use super::store::RegistryStore;

/// Writes images directly into a [`RegistryStore`].
///
/// Only the repository and tag of the target reference are used; the
/// registry host is ignored.
#[derive(Debug, Clone)]
pub struct InProcessPublisher {
    store: Arc<RegistryStore>,
}

impl InProcessPublisher {
    pub fn new(store: Arc<RegistryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ImagePublisher for InProcessPublisher {
    async fn push(&self, reference: &ImageReference, image: &OciImage) -> Result<PushResult> {
        let publish_error = |e: OciError| WrapError::Publish {
            reference: reference.to_string(),
            message: format!("{}: {}", e.code(), e.message()),
        };
        let name = reference.repository.as_str();
        let tag = reference
            .tag
            .as_deref()
            .or(reference.digest.as_deref())
            .ok_or_else(|| WrapError::Publish {
                reference: reference.to_string(),
                message: "reference has neither tag nor digest".to_string(),
            })?;

        for layer in image.layers() {
            if !self.store.has_blob(&layer.descriptor.digest) {
                self.store
                    .put_blob(&layer.descriptor.digest, Bytes::from(layer.data.clone()))
                    .map_err(publish_error)?;
            }
        }
        self.store
            .put_blob(image.config_digest(), Bytes::copy_from_slice(image.config_blob()))
            .map_err(publish_error)?;

        let manifest = serde_json::to_vec(image.manifest())?;
        let media_type = image
            .manifest()
            .media_type
            .clone()
            .unwrap_or_else(|| OCI_IMAGE_MANIFEST_MEDIA_TYPE.to_string());
        let digest = self
            .store
            .put_manifest(name, tag, &media_type, Bytes::from(manifest))
            .map_err(publish_error)?;

        tracing::info!(
            reference = %reference,
            digest = %digest,
            layers = image.layers().len(),
            "Image published in-process"
        );

        Ok(PushResult {
            config_url: format!("/v2/{}/blobs/{}", name, image.config_digest()),
            manifest_url: format!("/v2/{}/manifests/{}", name, digest),
        })
    }
}
