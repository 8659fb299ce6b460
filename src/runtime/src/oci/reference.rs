//! OCI image reference parsing.
//!
//! Parses references like `ghcr.io/org/app:1.0` into structured components and
//! converts them into the `oci-distribution` form used on the wire.

use oci_distribution::Reference;
use wrapd_core::error::{Result, WrapError};

/// Default registry when none is specified.
const DEFAULT_REGISTRY: &str = "docker.io";

/// Default tag when none is specified.
const DEFAULT_TAG: &str = "latest";

/// Parsed OCI image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    /// Registry host, optionally with port (e.g., "ghcr.io", "127.0.0.1:5000")
    pub registry: String,
    /// Repository path (e.g., "library/nginx", "wrap/a/b/with/c/d")
    pub repository: String,
    /// Tag (e.g., "latest", "1.0")
    pub tag: Option<String>,
    /// Digest (e.g., "sha256:abc123...")
    pub digest: Option<String>,
}

impl ImageReference {
    /// Build a tagged reference from already-validated parts.
    pub fn tagged(
        registry: impl Into<String>,
        repository: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            registry: registry.into(),
            repository: repository.into(),
            tag: Some(tag.into()),
            digest: None,
        }
    }

    /// Parse an image reference string.
    ///
    /// Supports formats:
    /// - `nginx` → docker.io/library/nginx:latest
    /// - `myuser/app:v1` → docker.io/myuser/app:v1
    /// - `ghcr.io/org/app:1.0` → ghcr.io/org/app:1.0
    /// - `localhost:5000/app` → localhost:5000/app:latest
    /// - `ghcr.io/org/app@sha256:...` → digest reference, no tag
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(invalid(reference, "empty image reference"));
        }

        let (name_tag, digest) = match reference.rsplit_once('@') {
            Some((name, digest)) => {
                if !digest.contains(':') {
                    return Err(invalid(reference, "expected digest in algorithm:hex form"));
                }
                (name, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        let (name, tag) = split_tag(name_tag);
        if let Some(tag) = tag {
            if tag.is_empty() {
                return Err(invalid(reference, "empty tag"));
            }
        }

        let (registry, repository) = split_registry_repository(name)
            .ok_or_else(|| invalid(reference, "empty repository"))?;

        let tag = match (tag, &digest) {
            (Some(tag), _) => Some(tag.to_string()),
            (None, None) => Some(DEFAULT_TAG.to_string()),
            (None, Some(_)) => None,
        };

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Get the full reference string.
    pub fn full_reference(&self) -> String {
        let mut s = format!("{}/{}", self.registry, self.repository);
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }

    /// Convert to the `oci-distribution` reference type.
    ///
    /// A digest wins over a tag, matching how registries resolve
    /// `name:tag@digest`.
    pub fn to_oci_reference(&self) -> Reference {
        match (&self.digest, &self.tag) {
            (Some(digest), _) => Reference::with_digest(
                self.registry.clone(),
                self.repository.clone(),
                digest.clone(),
            ),
            (None, Some(tag)) => {
                Reference::with_tag(self.registry.clone(), self.repository.clone(), tag.clone())
            }
            (None, None) => Reference::with_tag(
                self.registry.clone(),
                self.repository.clone(),
                DEFAULT_TAG.to_string(),
            ),
        }
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

impl std::str::FromStr for ImageReference {
    type Err = WrapError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn invalid(reference: &str, message: &str) -> WrapError {
    WrapError::InvalidReference {
        reference: reference.to_string(),
        message: message.to_string(),
    }
}

/// Split `name[:tag]`. The tag colon must come after the last `/`, and a
/// single-component name whose suffix is all digits is a `host:port`.
fn split_tag(name_tag: &str) -> (&str, Option<&str>) {
    let last_component_start = name_tag.rfind('/').map(|i| i + 1).unwrap_or(0);
    let Some(colon) = name_tag[last_component_start..].rfind(':') else {
        return (name_tag, None);
    };
    let colon = last_component_start + colon;
    let after = &name_tag[colon + 1..];

    if last_component_start == 0 && !after.is_empty() && after.chars().all(|c| c.is_ascii_digit())
    {
        return (name_tag, None);
    }
    (&name_tag[..colon], Some(after))
}

/// Split a name into registry and repository. The first component is a
/// registry when it contains a dot or colon, or is `localhost`.
fn split_registry_repository(name: &str) -> Option<(String, String)> {
    if let Some((first, rest)) = name.split_once('/') {
        if first.contains('.') || first.contains(':') || first == "localhost" {
            if rest.is_empty() {
                return None;
            }
            return Some((first.to_string(), rest.to_string()));
        }
    }

    if name.is_empty() {
        return None;
    }
    let repository = if name.contains('/') {
        name.to_string()
    } else {
        format!("library/{}", name)
    };
    Some((DEFAULT_REGISTRY.to_string(), repository))
}
