//! Record of compositions already published to the backing registry.
//!
//! Entries are keyed by the ordered pair (upstream, wrapper) exactly as the
//! client spelled them. Nothing is ever evicted: once a pair is published the
//! proxy never composes it again for the lifetime of the process, even if the
//! upstream tag moves.

use std::collections::HashSet;

use parking_lot::RwLock;

/// Separator between the two halves of a cache key.
const KEY_SEPARATOR: &str = "||";

/// Thread-safe set of published (upstream, wrapper) pairs.
#[derive(Debug, Default)]
pub struct CompositionCache {
    entries: RwLock<HashSet<String>>,
}

impl CompositionCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache key for a pair. Order matters: `(a, b)` and `(b, a)` differ.
    pub fn key(upstream: &str, wrapper: &str) -> String {
        format!("{}{}{}", upstream, KEY_SEPARATOR, wrapper)
    }

    /// Whether the pair has been published.
    pub fn has(&self, upstream: &str, wrapper: &str) -> bool {
        self.entries.read().contains(&Self::key(upstream, wrapper))
    }

    /// Mark the pair as published. Idempotent.
    pub fn set(&self, upstream: &str, wrapper: &str) {
        let inserted = self.entries.write().insert(Self::key(upstream, wrapper));
        if inserted {
            tracing::debug!(upstream = %upstream, wrapper = %wrapper, "Composition cached");
        }
    }

    /// Number of cached pairs.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no pair has been cached yet.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
