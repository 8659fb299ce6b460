//! Read-only view of a docker `config.json` credential file.
//!
//! Only the `auths` section is consulted. Each entry carries either a
//! base64 `auth` field (`user:password`) or explicit `username`/`password`
//! fields. Credential helpers (`credsStore`, `credHelpers`) are not run.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use base64::Engine;
use serde::Deserialize;
use wrapd_core::error::{Result, WrapError};

/// Docker Hub's canonical key in `auths`.
const DOCKER_HUB_KEY: &str = "index.docker.io";

#[derive(Debug, Default, Deserialize)]
struct AuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DockerConfigFile {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
}

/// Credential lookup backed by a docker `config.json`.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Create a credential store reading `path`.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get credentials for a registry. Returns `(username, password)`.
    ///
    /// The file is re-read on every call so that `docker login` takes effect
    /// without restarting the proxy.
    pub fn get(&self, registry: &str) -> Result<Option<(String, String)>> {
        let file = self.load()?;
        let wanted = normalize_registry(registry);
        let Some(entry) = file
            .auths
            .iter()
            .find(|(key, _)| normalize_registry(key) == wanted)
            .map(|(_, entry)| entry)
        else {
            return Ok(None);
        };
        decode_entry(entry, registry)
    }

    /// Load the file from disk. Returns empty if not found.
    fn load(&self) -> Result<DockerConfigFile> {
        if !self.path.exists() {
            return Ok(DockerConfigFile::default());
        }
        let data = std::fs::read_to_string(&self.path).map_err(|e| {
            WrapError::Config(format!(
                "Failed to read docker config {}: {}",
                self.path.display(),
                e
            ))
        })?;
        serde_json::from_str(&data).map_err(|e| {
            WrapError::Config(format!(
                "Failed to parse docker config {}: {}",
                self.path.display(),
                e
            ))
        })
    }
}

/// Entries without inline credentials (left behind by credential helpers)
/// decode to `None`.
fn decode_entry(entry: &AuthEntry, registry: &str) -> Result<Option<(String, String)>> {
    if let (Some(username), Some(password)) = (&entry.username, &entry.password) {
        return Ok(Some((username.clone(), password.clone())));
    }

    let encoded = match entry.auth.as_deref().map(str::trim) {
        Some(encoded) if !encoded.is_empty() => encoded,
        _ => return Ok(None),
    };
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| {
            WrapError::Config(format!("Invalid auth entry for {}: {}", registry, e))
        })?;
    let decoded = String::from_utf8(decoded).map_err(|e| {
        WrapError::Config(format!("Invalid auth entry for {}: {}", registry, e))
    })?;
    let (username, password) = decoded.split_once(':').ok_or_else(|| {
        WrapError::Config(format!(
            "Invalid auth entry for {}: expected user:password",
            registry
        ))
    })?;
    Ok(Some((username.to_string(), password.to_string())))
}

/// Normalize registry keys: strip scheme and path, fold Docker Hub aliases.
///
/// `https://index.docker.io/v1/`, `docker.io` and `registry-1.docker.io`
/// all become `index.docker.io`.
fn normalize_registry(registry: &str) -> String {
    let r = registry.trim().to_lowercase();
    let r = r
        .strip_prefix("https://")
        .or_else(|| r.strip_prefix("http://"))
        .unwrap_or(&r);
    let host = r.split('/').next().unwrap_or(r);
    match host {
        "docker.io" | "registry-1.docker.io" | "index.docker.io" => DOCKER_HUB_KEY.to_string(),
        other => other.to_string(),
    }
}
