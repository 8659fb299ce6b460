//! Seams between the proxy and whatever serves or stores images.

use async_trait::async_trait;
use wrapd_core::error::Result;

use super::image::OciImage;
use super::reference::ImageReference;

/// Anything that can materialize an image by reference.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Fetch the manifest, config and every layer of `reference`.
    async fn pull(&self, reference: &ImageReference) -> Result<OciImage>;
}

/// Anything that can store an image under a reference.
#[async_trait]
pub trait ImagePublisher: Send + Sync {
    /// Store `image` so that `reference` resolves to it.
    async fn push(&self, reference: &ImageReference, image: &OciImage) -> Result<PushResult>;
}

/// Result of a successful image push.
#[derive(Debug, Clone)]
pub struct PushResult {
    /// URL of the pushed config blob.
    pub config_url: String,
    /// URL of the pushed manifest.
    pub manifest_url: String,
}
