//! wrapd Core - shared types for the image-wrapping registry proxy.
//!
//! Holds the error taxonomy, the layered proxy configuration and the
//! constants the other crates agree on.

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::{LogFormat, ProxyConfig, PublishTransport};
pub use error::{CompositionStage, Result, WrapError};

/// wrapd version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
