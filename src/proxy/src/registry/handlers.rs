use std::collections::HashMap;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use wrapd_runtime::oci::OCI_IMAGE_MANIFEST_MEDIA_TYPE;

use super::error::OciError;
use super::store::{is_digest, RegistryStore};

const API_VERSION: &str = "registry/2.0";

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) -> Result<(), OciError> {
    let header_name = axum::http::header::HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| OciError::internal(format!("Invalid header name {name}: {e}")))?;
    let header_value = axum::http::header::HeaderValue::from_str(value)
        .map_err(|e| OciError::internal(format!("Invalid header value for {name}: {e}")))?;
    headers.insert(header_name, header_value);
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum OciRoute {
    Manifest { name: String, reference: String },
    Blob { name: String, digest: String },
    BlobUploadStart { name: String },
    BlobUpload { name: String, uuid: String },
    TagList { name: String },
}

pub(crate) fn parse_oci_path(path: &str) -> Option<OciRoute> {
    let path = path.strip_prefix('/').unwrap_or(path);

    if let Some(name) = path.strip_suffix("/tags/list") {
        if !name.is_empty() {
            return Some(OciRoute::TagList {
                name: name.to_string(),
            });
        }
    }

    if let Some(name) = path
        .strip_suffix("/blobs/uploads/")
        .or_else(|| path.strip_suffix("/blobs/uploads"))
    {
        if !name.is_empty() {
            return Some(OciRoute::BlobUploadStart {
                name: name.to_string(),
            });
        }
    }

    if let Some(idx) = path.rfind("/blobs/uploads/") {
        let name = &path[..idx];
        let uuid = &path[idx + "/blobs/uploads/".len()..];
        if !name.is_empty() && !uuid.is_empty() {
            return Some(OciRoute::BlobUpload {
                name: name.to_string(),
                uuid: uuid.to_string(),
            });
        }
    }

    if let Some(idx) = path.rfind("/blobs/") {
        let name = &path[..idx];
        let digest = &path[idx + "/blobs/".len()..];
        if !name.is_empty() && !digest.is_empty() {
            return Some(OciRoute::Blob {
                name: name.to_string(),
                digest: digest.to_string(),
            });
        }
    }

    if let Some(idx) = path.rfind("/manifests/") {
        let name = &path[..idx];
        let reference = &path[idx + "/manifests/".len()..];
        if !name.is_empty() && !reference.is_empty() {
            return Some(OciRoute::Manifest {
                name: name.to_string(),
                reference: reference.to_string(),
            });
        }
    }

    None
}

pub async fn v2_base() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("Docker-Distribution-API-Version", API_VERSION)],
        "",
    )
}

pub async fn oci_dispatch(
    method: Method,
    State(store): State<Arc<RegistryStore>>,
    Path(path): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, OciError> {
    let route = parse_oci_path(&path).ok_or_else(|| OciError::name_unknown("not found"))?;

    let response = match route {
        OciRoute::Manifest { name, reference } => match method {
            Method::GET | Method::HEAD => get_manifest(&method, &store, &name, &reference),
            Method::PUT => put_manifest(&store, &name, &reference, &headers, body),
            Method::DELETE => delete_manifest(&store, &name, &reference),
            _ => Err(OciError::unsupported("method not allowed")),
        },
        OciRoute::Blob { name, digest } => match method {
            Method::GET | Method::HEAD => get_blob(&method, &store, &name, &digest),
            _ => Err(OciError::unsupported("method not allowed")),
        },
        OciRoute::BlobUploadStart { name } => match method {
            Method::POST => start_upload(&store, &name, &params, body),
            _ => Err(OciError::unsupported("method not allowed")),
        },
        OciRoute::BlobUpload { name, uuid } => match method {
            Method::GET => get_upload_status(&store, &name, &uuid),
            Method::PATCH => patch_upload(&store, &name, &uuid, &headers, body),
            Method::PUT => put_upload(&store, &name, &uuid, &params, body),
            Method::DELETE => delete_upload(&store, &name, &uuid),
            _ => Err(OciError::unsupported("method not allowed")),
        },
        OciRoute::TagList { name } => match method {
            Method::GET => list_tags(&store, &name),
            _ => Err(OciError::unsupported("method not allowed")),
        },
    };

    if let Err(error) = &response {
        tracing::debug!(
            method = %method,
            path = %path,
            status = error.status().as_u16(),
            code = error.code(),
            message = error.message(),
            "Registry request failed"
        );
    }
    response
}

fn get_manifest(
    method: &Method,
    store: &RegistryStore,
    name: &str,
    reference: &str,
) -> Result<Response, OciError> {
    let manifest = store
        .get_manifest(name, reference)
        .ok_or_else(|| OciError::manifest_unknown(format!("{name}:{reference}")))?;

    let mut headers = HeaderMap::new();
    insert_header(&mut headers, "Docker-Content-Digest", &manifest.digest)?;
    insert_header(&mut headers, "Content-Type", &manifest.content_type)?;
    insert_header(&mut headers, "Docker-Distribution-API-Version", API_VERSION)?;
    insert_header(&mut headers, "Content-Length", &manifest.data.len().to_string())?;

    if *method == Method::HEAD {
        return Ok((StatusCode::OK, headers, Body::empty()).into_response());
    }
    Ok((StatusCode::OK, headers, Body::from(manifest.data)).into_response())
}

/// Descriptors an image manifest refers to. Indexes and other artifacts
/// have no `config` and are not checked.
#[derive(Deserialize)]
struct ManifestRefs {
    config: Option<DescriptorRef>,
    #[serde(default)]
    layers: Vec<DescriptorRef>,
}

#[derive(Deserialize)]
struct DescriptorRef {
    digest: String,
}

fn put_manifest(
    store: &RegistryStore,
    name: &str,
    reference: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response, OciError> {
    let refs: ManifestRefs = serde_json::from_slice(&body)
        .map_err(|e| OciError::manifest_invalid(format!("invalid manifest: {e}")))?;
    if let Some(config) = &refs.config {
        let missing = std::iter::once(config)
            .chain(refs.layers.iter())
            .find(|d| !store.has_blob(&d.digest));
        if let Some(missing) = missing {
            return Err(OciError::manifest_blob_unknown(missing.digest.clone()));
        }
    }

    let content_type = headers
        .get("Content-Type")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or(OCI_IMAGE_MANIFEST_MEDIA_TYPE);
    let digest = store.put_manifest(name, reference, content_type, body)?;

    tracing::debug!(name = %name, reference = %reference, digest = %digest, "Manifest stored");

    let mut response_headers = HeaderMap::new();
    insert_header(
        &mut response_headers,
        "Location",
        &format!("/v2/{name}/manifests/{digest}"),
    )?;
    insert_header(&mut response_headers, "Docker-Content-Digest", &digest)?;
    Ok((StatusCode::CREATED, response_headers, Body::empty()).into_response())
}

fn delete_manifest(store: &RegistryStore, name: &str, reference: &str) -> Result<Response, OciError> {
    if !store.delete_manifest(name, reference) {
        return Err(OciError::manifest_unknown(format!("{name}:{reference}")));
    }
    Ok(StatusCode::ACCEPTED.into_response())
}

fn get_blob(
    method: &Method,
    store: &RegistryStore,
    name: &str,
    digest: &str,
) -> Result<Response, OciError> {
    if !is_digest(digest) {
        return Err(OciError::digest_invalid(digest.to_string()));
    }
    let data = store
        .get_blob(digest)
        .ok_or_else(|| OciError::blob_unknown(format!("{name}@{digest}")))?;

    let mut headers = HeaderMap::new();
    insert_header(&mut headers, "Docker-Content-Digest", digest)?;
    insert_header(&mut headers, "Content-Type", "application/octet-stream")?;
    insert_header(&mut headers, "Content-Length", &data.len().to_string())?;

    if *method == Method::HEAD {
        return Ok((StatusCode::OK, headers, Body::empty()).into_response());
    }
    Ok((StatusCode::OK, headers, Body::from(data)).into_response())
}

fn start_upload(
    store: &RegistryStore,
    name: &str,
    params: &HashMap<String, String>,
    body: Bytes,
) -> Result<Response, OciError> {
    let mut headers = HeaderMap::new();

    // monolithic upload in a single POST
    if let Some(digest) = params.get("digest") {
        store.put_blob(digest, body)?;
        insert_header(&mut headers, "Location", &format!("/v2/{name}/blobs/{digest}"))?;
        insert_header(&mut headers, "Docker-Content-Digest", digest)?;
        return Ok((StatusCode::CREATED, headers, Body::empty()).into_response());
    }

    let session_id = store.start_upload(name);
    insert_header(
        &mut headers,
        "Location",
        &format!("/v2/{name}/blobs/uploads/{session_id}"),
    )?;
    insert_header(&mut headers, "Docker-Upload-UUID", &session_id)?;
    insert_header(&mut headers, "Range", "0-0")?;
    Ok((StatusCode::ACCEPTED, headers, Body::empty()).into_response())
}

fn get_upload_status(store: &RegistryStore, name: &str, uuid: &str) -> Result<Response, OciError> {
    let received = store.upload_len(name, uuid)?;
    let headers = upload_headers(name, uuid, received)?;
    Ok((StatusCode::NO_CONTENT, headers, Body::empty()).into_response())
}

fn patch_upload(
    store: &RegistryStore,
    name: &str,
    uuid: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response, OciError> {
    let start = content_range_start(headers)?;
    let received = store.append_upload(name, uuid, start, &body)?;
    let headers = upload_headers(name, uuid, received)?;
    Ok((StatusCode::ACCEPTED, headers, Body::empty()).into_response())
}

fn put_upload(
    store: &RegistryStore,
    name: &str,
    uuid: &str,
    params: &HashMap<String, String>,
    body: Bytes,
) -> Result<Response, OciError> {
    let digest = params
        .get("digest")
        .ok_or_else(|| OciError::digest_invalid("missing digest query parameter"))?;
    store.finish_upload(name, uuid, digest, &body)?;

    let mut headers = HeaderMap::new();
    insert_header(&mut headers, "Location", &format!("/v2/{name}/blobs/{digest}"))?;
    insert_header(&mut headers, "Docker-Content-Digest", digest)?;
    Ok((StatusCode::CREATED, headers, Body::empty()).into_response())
}

fn delete_upload(store: &RegistryStore, name: &str, uuid: &str) -> Result<Response, OciError> {
    if !store.cancel_upload(name, uuid) {
        return Err(OciError::blob_upload_unknown(format!("{name}:{uuid}")));
    }
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[derive(serde::Serialize)]
struct TagList<'a> {
    name: &'a str,
    tags: Vec<String>,
}

fn list_tags(store: &RegistryStore, name: &str) -> Result<Response, OciError> {
    let tags = store
        .tags(name)
        .ok_or_else(|| OciError::name_unknown(name.to_string()))?;
    let body = serde_json::to_string(&TagList { name, tags })
        .map_err(|e| OciError::internal(e.to_string()))?;
    Ok((
        StatusCode::OK,
        [("Content-Type", "application/json")],
        body,
    )
        .into_response())
}

fn upload_headers(name: &str, uuid: &str, received: usize) -> Result<HeaderMap, OciError> {
    let mut headers = HeaderMap::new();
    insert_header(
        &mut headers,
        "Location",
        &format!("/v2/{name}/blobs/uploads/{uuid}"),
    )?;
    insert_header(&mut headers, "Docker-Upload-UUID", uuid)?;
    insert_header(&mut headers, "Range", &upload_range(received))?;
    Ok(headers)
}

/// `Range` value for an upload that has received `received` bytes.
fn upload_range(received: usize) -> String {
    format!("0-{}", received.saturating_sub(1))
}

/// Start offset of a `Content-Range: <start>-<end>` chunk header.
fn content_range_start(headers: &HeaderMap) -> Result<Option<usize>, OciError> {
    let Some(value) = headers.get("Content-Range") else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| OciError::range_invalid("non-ascii Content-Range"))?;
    let value = value
        .trim()
        .trim_start_matches("bytes=")
        .trim_start_matches("bytes ");
    let start = value
        .split_once('-')
        .map(|(start, _)| start)
        .unwrap_or(value);
    start
        .trim()
        .parse::<usize>()
        .map(Some)
        .map_err(|_| OciError::range_invalid(format!("invalid Content-Range: {value}")))
}
