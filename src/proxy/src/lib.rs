//! wrapd proxy - registry front end that composes wrapped images.
//!
//! - `grammar`: wrap path classification and parsing
//! - `dispatcher`: per-request control flow (compose on miss, then forward)
//! - `registry`: in-memory backing registry the proxy forwards to
//! - `server`: listener bootstrap and graceful shutdown

pub mod dispatcher;
pub mod error;
pub mod grammar;
pub mod registry;
pub mod server;

pub use dispatcher::{Dispatcher, DispatcherOptions};
pub use grammar::{ParsedWrapRequest, RouteClass};
pub use registry::{BackingRegistry, InProcessPublisher};
pub use server::ProxyServer;
