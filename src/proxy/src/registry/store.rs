//! In-memory storage behind the backing registry.
//!
//! Blobs are content-addressed and shared by every repository. Manifests are
//! stored per repository by digest, with tags pointing at digests. Nothing is
//! ever garbage collected; the store lives as long as the process.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use axum::body::Bytes;
use parking_lot::RwLock;
use wrapd_runtime::oci::sha256_digest;

use super::error::OciError;

/// A stored manifest.
#[derive(Debug, Clone)]
pub struct StoredManifest {
    /// `Content-Type` the manifest was pushed with
    pub content_type: String,
    /// Manifest digest
    pub digest: String,
    /// Raw manifest bytes
    pub data: Bytes,
}

#[derive(Debug, Default)]
struct Repository {
    /// tag -> manifest digest
    tags: BTreeMap<String, String>,
    /// digest -> manifest
    manifests: HashMap<String, StoredManifest>,
}

/// An in-progress blob upload.
#[derive(Debug)]
struct UploadSession {
    name: String,
    data: Vec<u8>,
    created_at: Instant,
}

/// Thread-safe in-memory registry storage.
#[derive(Debug, Default)]
pub struct RegistryStore {
    blobs: RwLock<HashMap<String, Bytes>>,
    repositories: RwLock<HashMap<String, Repository>>,
    uploads: RwLock<HashMap<String, UploadSession>>,
}

impl RegistryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a blob by digest.
    pub fn get_blob(&self, digest: &str) -> Option<Bytes> {
        self.blobs.read().get(digest).cloned()
    }

    /// Whether a blob exists.
    pub fn has_blob(&self, digest: &str) -> bool {
        self.blobs.read().contains_key(digest)
    }

    /// Store a blob after checking it against `digest`.
    pub fn put_blob(&self, digest: &str, data: Bytes) -> Result<(), OciError> {
        verify_digest(digest, &data)?;
        self.blobs.write().insert(digest.to_string(), data);
        Ok(())
    }

    /// Start an upload session for repository `name`. Returns the session id.
    pub fn start_upload(&self, name: &str) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.uploads.write().insert(
            id.clone(),
            UploadSession {
                name: name.to_string(),
                data: Vec::new(),
                created_at: Instant::now(),
            },
        );
        id
    }

    /// Bytes received so far by an upload session.
    pub fn upload_len(&self, name: &str, id: &str) -> Result<usize, OciError> {
        let uploads = self.uploads.read();
        let session = session(&uploads, name, id)?;
        Ok(session.data.len())
    }

    /// Append a chunk to an upload. `start` is the offset the client claims
    /// the chunk begins at; it must equal the bytes received so far.
    /// Returns the new length.
    pub fn append_upload(
        &self,
        name: &str,
        id: &str,
        start: Option<usize>,
        chunk: &[u8],
    ) -> Result<usize, OciError> {
        let mut uploads = self.uploads.write();
        let session = session_mut(&mut uploads, name, id)?;
        if let Some(start) = start {
            if start != session.data.len() {
                return Err(OciError::range_invalid(format!(
                    "chunk starts at {} but {} bytes were received",
                    start,
                    session.data.len()
                )));
            }
        }
        session.data.extend_from_slice(chunk);
        Ok(session.data.len())
    }

    /// Finish an upload with an optional last chunk and store the blob.
    ///
    /// The session is consumed either way: a digest mismatch discards it.
    pub fn finish_upload(
        &self,
        name: &str,
        id: &str,
        digest: &str,
        last_chunk: &[u8],
    ) -> Result<(), OciError> {
        let mut session = {
            let mut uploads = self.uploads.write();
            session(&uploads, name, id)?;
            uploads
                .remove(id)
                .ok_or_else(|| OciError::blob_upload_unknown(id.to_string()))?
        };
        session.data.extend_from_slice(last_chunk);
        tracing::debug!(
            name = %name,
            digest = %digest,
            size = session.data.len(),
            age_ms = session.created_at.elapsed().as_millis() as u64,
            "Upload finished"
        );
        self.put_blob(digest, Bytes::from(session.data))
    }

    /// Cancel an upload. Returns whether it existed.
    pub fn cancel_upload(&self, name: &str, id: &str) -> bool {
        let mut uploads = self.uploads.write();
        if session(&uploads, name, id).is_err() {
            return false;
        }
        uploads.remove(id).is_some()
    }

    /// Store a manifest under `reference` (a tag or its own digest).
    /// Returns the manifest digest.
    pub fn put_manifest(
        &self,
        name: &str,
        reference: &str,
        content_type: &str,
        data: Bytes,
    ) -> Result<String, OciError> {
        let digest = sha256_digest(&data);
        if is_digest(reference) && reference != digest {
            return Err(OciError::digest_invalid(format!(
                "manifest digest {} does not match reference {}",
                digest, reference
            )));
        }

        let mut repositories = self.repositories.write();
        let repository = repositories.entry(name.to_string()).or_default();
        repository.manifests.insert(
            digest.clone(),
            StoredManifest {
                content_type: content_type.to_string(),
                digest: digest.clone(),
                data,
            },
        );
        if !is_digest(reference) {
            repository
                .tags
                .insert(reference.to_string(), digest.clone());
        }
        Ok(digest)
    }

    /// Look up a manifest by tag or digest.
    pub fn get_manifest(&self, name: &str, reference: &str) -> Option<StoredManifest> {
        let repositories = self.repositories.read();
        let repository = repositories.get(name)?;
        let digest = if is_digest(reference) {
            reference
        } else {
            repository.tags.get(reference)?.as_str()
        };
        repository.manifests.get(digest).cloned()
    }

    /// Delete a tag, or a manifest and every tag pointing at it.
    /// Returns whether anything was removed.
    pub fn delete_manifest(&self, name: &str, reference: &str) -> bool {
        let mut repositories = self.repositories.write();
        let Some(repository) = repositories.get_mut(name) else {
            return false;
        };
        if is_digest(reference) {
            repository.tags.retain(|_, digest| digest != reference);
            repository.manifests.remove(reference).is_some()
        } else {
            repository.tags.remove(reference).is_some()
        }
    }

    /// Sorted tags of a repository, or `None` if it does not exist.
    pub fn tags(&self, name: &str) -> Option<Vec<String>> {
        self.repositories
            .read()
            .get(name)
            .map(|repository| repository.tags.keys().cloned().collect())
    }

    /// Number of stored blobs.
    pub fn blob_count(&self) -> usize {
        self.blobs.read().len()
    }
}

fn session<'a>(
    uploads: &'a HashMap<String, UploadSession>,
    name: &str,
    id: &str,
) -> Result<&'a UploadSession, OciError> {
    uploads
        .get(id)
        .filter(|s| s.name == name)
        .ok_or_else(|| OciError::blob_upload_unknown(format!("{}:{}", name, id)))
}

fn session_mut<'a>(
    uploads: &'a mut HashMap<String, UploadSession>,
    name: &str,
    id: &str,
) -> Result<&'a mut UploadSession, OciError> {
    uploads
        .get_mut(id)
        .filter(|s| s.name == name)
        .ok_or_else(|| OciError::blob_upload_unknown(format!("{}:{}", name, id)))
}

/// Whether a manifest reference is a digest rather than a tag.
pub fn is_digest(reference: &str) -> bool {
    reference.contains(':')
}

fn verify_digest(digest: &str, data: &[u8]) -> Result<(), OciError> {
    if !digest.starts_with("sha256:") {
        return Err(OciError::digest_invalid(format!(
            "unsupported digest algorithm: {}",
            digest
        )));
    }
    let actual = sha256_digest(data);
    if actual != digest {
        return Err(OciError::digest_invalid(format!(
            "expected {}, got {}",
            digest, actual
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

    #[test]
    fn test_put_and_get_blob() {
        let store = RegistryStore::new();
        let data = Bytes::from_static(b"layer");
        let digest = sha256_digest(&data);
        store.put_blob(&digest, data.clone()).unwrap();
        assert!(store.has_blob(&digest));
        assert_eq!(store.get_blob(&digest), Some(data));
        assert_eq!(store.blob_count(), 1);
    }

    #[test]
    fn test_put_blob_rejects_wrong_digest() {
        let store = RegistryStore::new();
        let err = store
            .put_blob(&sha256_digest(b"other"), Bytes::from_static(b"layer"))
            .unwrap_err();
        assert_eq!(err.code(), "DIGEST_INVALID");
        assert_eq!(store.blob_count(), 0);
    }

    #[test]
    fn test_put_blob_rejects_unknown_algorithm() {
        let store = RegistryStore::new();
        assert!(store
            .put_blob("md5:abc", Bytes::from_static(b"layer"))
            .is_err());
    }

    #[test]
    fn test_chunked_upload() {
        let store = RegistryStore::new();
        let id = store.start_upload("ns/app");
        assert_eq!(store.append_upload("ns/app", &id, Some(0), b"hello ").unwrap(), 6);
        assert_eq!(store.append_upload("ns/app", &id, Some(6), b"world").unwrap(), 11);
        assert_eq!(store.upload_len("ns/app", &id).unwrap(), 11);

        let digest = sha256_digest(b"hello world!");
        store.finish_upload("ns/app", &id, &digest, b"!").unwrap();
        assert_eq!(store.get_blob(&digest).unwrap(), Bytes::from_static(b"hello world!"));
        assert!(store.upload_len("ns/app", &id).is_err());
    }

    #[test]
    fn test_append_rejects_out_of_order_chunk() {
        let store = RegistryStore::new();
        let id = store.start_upload("ns/app");
        store.append_upload("ns/app", &id, None, b"abc").unwrap();
        let err = store.append_upload("ns/app", &id, Some(10), b"def").unwrap_err();
        assert_eq!(err.code(), "BLOB_UPLOAD_INVALID");
    }

    #[test]
    fn test_upload_bound_to_repository() {
        let store = RegistryStore::new();
        let id = store.start_upload("ns/app");
        assert!(store.append_upload("ns/other", &id, None, b"x").is_err());
        assert!(!store.cancel_upload("ns/other", &id));
        assert!(store.cancel_upload("ns/app", &id));
        assert!(!store.cancel_upload("ns/app", &id));
    }

    #[test]
    fn test_finish_upload_digest_mismatch_discards_session() {
        let store = RegistryStore::new();
        let id = store.start_upload("ns/app");
        store.append_upload("ns/app", &id, None, b"abc").unwrap();
        assert!(store
            .finish_upload("ns/app", &id, &sha256_digest(b"xyz"), b"")
            .is_err());
        assert!(store.upload_len("ns/app", &id).is_err());
    }

    #[test]
    fn test_manifest_by_tag_and_digest() {
        let store = RegistryStore::new();
        let data = Bytes::from_static(b"{\"schemaVersion\":2}");
        let digest = store
            .put_manifest("wrap/a/b/with/c/d", "latest", MANIFEST_TYPE, data.clone())
            .unwrap();

        let by_tag = store.get_manifest("wrap/a/b/with/c/d", "latest").unwrap();
        assert_eq!(by_tag.digest, digest);
        assert_eq!(by_tag.content_type, MANIFEST_TYPE);
        let by_digest = store.get_manifest("wrap/a/b/with/c/d", &digest).unwrap();
        assert_eq!(by_digest.data, data);
        assert!(store.get_manifest("wrap/a/b/with/c/d", "v2").is_none());
        assert!(store.get_manifest("other", "latest").is_none());
    }

    #[test]
    fn test_put_manifest_by_wrong_digest() {
        let store = RegistryStore::new();
        let err = store
            .put_manifest("ns/app", "sha256:0000", MANIFEST_TYPE, Bytes::from_static(b"{}"))
            .unwrap_err();
        assert_eq!(err.code(), "DIGEST_INVALID");
    }

    #[test]
    fn test_retag_moves_tag() {
        let store = RegistryStore::new();
        store
            .put_manifest("ns/app", "latest", MANIFEST_TYPE, Bytes::from_static(b"{\"a\":1}"))
            .unwrap();
        let second = store
            .put_manifest("ns/app", "latest", MANIFEST_TYPE, Bytes::from_static(b"{\"a\":2}"))
            .unwrap();
        assert_eq!(store.get_manifest("ns/app", "latest").unwrap().digest, second);
    }

    #[test]
    fn test_tags_sorted() {
        let store = RegistryStore::new();
        for tag in ["v2", "latest", "v1"] {
            store
                .put_manifest("ns/app", tag, MANIFEST_TYPE, Bytes::from_static(b"{}"))
                .unwrap();
        }
        assert_eq!(store.tags("ns/app").unwrap(), vec!["latest", "v1", "v2"]);
        assert!(store.tags("ns/missing").is_none());
    }

    #[test]
    fn test_delete_manifest() {
        let store = RegistryStore::new();
        let digest = store
            .put_manifest("ns/app", "latest", MANIFEST_TYPE, Bytes::from_static(b"{}"))
            .unwrap();
        store
            .put_manifest("ns/app", "stable", MANIFEST_TYPE, Bytes::from_static(b"{}"))
            .unwrap();

        assert!(store.delete_manifest("ns/app", "stable"));
        assert!(store.get_manifest("ns/app", "latest").is_some());

        assert!(store.delete_manifest("ns/app", &digest));
        assert!(store.get_manifest("ns/app", "latest").is_none());
        assert!(store.tags("ns/app").unwrap().is_empty());
        assert!(!store.delete_manifest("ns/app", &digest));
    }
}
