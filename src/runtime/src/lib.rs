//! wrapd runtime - image handling behind the wrapping proxy.
//!
//! This crate provides pulling, composition and publishing of OCI images,
//! plus the composition cache and proxy metrics.

#![allow(clippy::result_large_err)]

pub mod cache;
pub mod metrics;
pub mod oci;

// Re-export common types
pub use cache::CompositionCache;
pub use metrics::ProxyMetrics;
pub use oci::{CredentialStore, ImageComposer, ImageReference, OciImage};
pub use oci::{ImagePublisher, ImageSource, PushResult};
pub use oci::{RegistryAuth, RegistryPuller, RegistryPusher};
