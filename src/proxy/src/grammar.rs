//! Wrap path grammar.
//!
//! A wrap request encodes two images in its path, each written as
//! `registry/repository/tag` (the tag separated by a slash instead of a
//! colon so the whole thing stays a valid repository name):
//!
//! ```text
//! /v2/wrap/reg.example/ns/app/1.0/with/reg.example/ns/wrapper/latest/manifests/latest
//!          └──────── upstream ──────┘      └────────── wrapper ────────┘           └tag┘
//! ```
//!
//! Captures are greedy, so `/with/` and `/manifests/` bind to their last
//! occurrence. Everything here is pure.

use std::sync::LazyLock;

use regex::Regex;
use wrapd_core::error::{Result, WrapError};

/// Any request below a wrap repository (manifests, blobs, tags, ...).
const WRAP_FAMILY_PATTERN: &str = r"^/v2/wrap/(.+)/with/(.+)$";

/// Manifest request for a wrap repository.
const WRAP_MANIFEST_PATTERN: &str = r"^/v2/wrap/(.+)/with/(.+)/manifests/(.+)$";

/// How a request path is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    /// Manifest request for a wrap repository; may trigger a composition.
    WrapManifest,
    /// Other wrap repository traffic (blobs, tag lists); forwarded as-is.
    WrapOther,
    /// Not a wrap path; forwarded as-is.
    Passthrough,
}

impl RouteClass {
    /// Short label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WrapManifest => "wrap-manifest",
            Self::WrapOther => "wrap-other",
            Self::Passthrough => "passthrough",
        }
    }
}

impl std::fmt::Display for RouteClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

static WRAP_MANIFEST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(WRAP_MANIFEST_PATTERN).expect("valid wrap manifest pattern"));

static WRAP_FAMILY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(WRAP_FAMILY_PATTERN).expect("valid wrap family pattern"));

/// Ordered routing table. First match wins.
static RULES: LazyLock<[(RouteClass, &'static Regex); 2]> = LazyLock::new(|| {
    [
        (RouteClass::WrapManifest, &*WRAP_MANIFEST),
        (RouteClass::WrapOther, &*WRAP_FAMILY),
    ]
});

/// Classify a request path.
pub fn classify(path: &str) -> RouteClass {
    RULES
        .iter()
        .find(|(_, pattern)| pattern.is_match(path))
        .map(|(class, _)| *class)
        .unwrap_or(RouteClass::Passthrough)
}

/// A validated wrap manifest request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedWrapRequest {
    /// Repository path in the backing registry, `/wrap/{upstream}/with/{wrapper}`
    pub canonical_path: String,
    /// Upstream image as `registry/repository:tag`
    pub upstream_image: String,
    /// Wrapper image as `registry/repository:tag`
    pub target_image: String,
    /// Manifest reference the client asked for
    pub reference: String,
}

impl ParsedWrapRequest {
    /// Backing registry repository name (canonical path without the leading slash).
    pub fn repository(&self) -> &str {
        self.canonical_path.trim_start_matches('/')
    }
}

/// Parse a wrap manifest path.
pub fn parse(path: &str) -> Result<ParsedWrapRequest> {
    let captures = WRAP_MANIFEST.captures(path).ok_or_else(|| {
        WrapError::MalformedRequest(
            "invalid path, expected /wrap/{upstream-image}/with/{target-image}".to_string(),
        )
    })?;
    let upstream = &captures[1];
    let target = &captures[2];
    let reference = &captures[3];

    if !upstream.contains('/') {
        return Err(WrapError::MalformedRequest(
            "invalid upstream image format".to_string(),
        ));
    }
    if !target.contains('/') {
        return Err(WrapError::MalformedRequest(
            "invalid target image format".to_string(),
        ));
    }

    Ok(ParsedWrapRequest {
        canonical_path: format!("/wrap/{}/with/{}", upstream, target),
        upstream_image: image_slash_tag_to_reference(upstream),
        target_image: image_slash_tag_to_reference(target),
        reference: reference.to_string(),
    })
}

/// Turn `repo/name/tag` into `repo/name:tag` by replacing the last slash.
/// Input without a slash is returned unchanged.
pub fn image_slash_tag_to_reference(image: &str) -> String {
    match image.rsplit_once('/') {
        Some((name, tag)) => format!("{}:{}", name, tag),
        None => image.to_string(),
    }
}
