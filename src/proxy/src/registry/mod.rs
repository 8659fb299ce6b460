//! In-memory backing registry.
//!
//! Implements the subset of the distribution API that clients and
//! `oci-distribution` use: base check, manifests, blobs, blob uploads
//! (monolithic and chunked) and tag listing. All wrapd responses for
//! successful requests are produced here.

pub mod error;
pub mod handlers;
pub mod publisher;
pub mod routes;
pub mod store;

use std::sync::Arc;

use axum::Router;

pub use error::OciError;
pub use publisher::InProcessPublisher;
pub use store::RegistryStore;

/// The backing registry: shared store plus its HTTP router.
#[derive(Debug, Clone, Default)]
pub struct BackingRegistry {
    store: Arc<RegistryStore>,
}

impl BackingRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared store.
    pub fn store(&self) -> &Arc<RegistryStore> {
        &self.store
    }

    /// HTTP router serving the distribution API.
    pub fn router(&self) -> Router {
        routes::build_router(Arc::clone(&self.store))
    }

    /// Publisher writing straight into this registry's store.
    pub fn in_process_publisher(&self) -> InProcessPublisher {
        InProcessPublisher::new(Arc::clone(&self.store))
    }
}
