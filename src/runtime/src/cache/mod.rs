//! Caches that let repeated wrap requests skip work.
//!
//! - `CompositionCache`: which (upstream, wrapper) pairs are already published

pub mod composition;

pub use composition::CompositionCache;
