//! OCI image support for wrapd.
//!
//! This module pulls images into memory, composes wrapped images out of
//! them and pushes the result to a registry.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   pull    ┌──────────┐   wrap    ┌──────────┐   push    ┌──────────────┐
//! │   upstream   │──────────▶│          │──────────▶│          │──────────▶│   backing    │
//! │  registries  │           │ OciImage │           │ OciImage │           │   registry   │
//! │              │──────────▶│          │           │          │           │              │
//! └──────────────┘  wrapper  └──────────┘           └──────────┘           └──────────────┘
//!                            ImageSource            ImageComposer          ImagePublisher
//! ```

pub mod compose;
pub mod credentials;
mod image;
pub mod reference;
pub mod registry;
mod source;

pub use compose::ImageComposer;
pub use credentials::CredentialStore;
pub use image::{
    sha256_digest, ContainerConfig, History, ImageConfig, Layer, OciImage, RootFs,
    OCI_IMAGE_CONFIG_MEDIA_TYPE, OCI_IMAGE_MANIFEST_MEDIA_TYPE, OCI_LAYER_GZIP_MEDIA_TYPE,
};
pub use reference::ImageReference;
pub use registry::{RegistryAuth, RegistryPuller, RegistryPusher};
pub use source::{ImagePublisher, ImageSource, PushResult};
