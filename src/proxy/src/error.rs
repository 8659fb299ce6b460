//! HTTP error conversions.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use wrapd_core::error::WrapError;

/// Status code a wrap failure is reported with.
///
/// A path outside the wrap grammar is the client's fault and an image that
/// cannot be pulled is an upstream failure. Everything else, including a
/// reference that fails to parse, is ours.
pub fn status_for(err: &WrapError) -> StatusCode {
    if err.is_client_error() {
        return StatusCode::BAD_REQUEST;
    }
    match err {
        WrapError::Resolution { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Convert a WrapError to a plain-text HTTP response.
pub fn error_response(err: &WrapError) -> Response {
    (
        status_for(err),
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        err.to_string(),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wrapd_core::error::CompositionStage;

    #[test]
    fn test_malformed_request_maps_to_bad_request() {
        let err = WrapError::MalformedRequest("invalid upstream image format".to_string());
        assert_eq!(status_for(&err), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_invalid_reference_maps_to_internal() {
        let err = WrapError::InvalidReference {
            reference: "reg/app:".to_string(),
            message: "empty tag".to_string(),
        };
        assert_eq!(status_for(&err), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_resolution_maps_to_bad_gateway() {
        let err = WrapError::Resolution {
            reference: "ghcr.io/org/app:1.0".to_string(),
            message: "manifest unknown".to_string(),
        };
        assert_eq!(status_for(&err), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_wrapper_config_maps_to_internal() {
        let err = WrapError::WrapperConfig("wrapper image missing label".to_string());
        assert_eq!(status_for(&err), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_composition_and_publish_map_to_internal() {
        let composition = WrapError::composition(CompositionStage::AppendLayer, "boom");
        let publish = WrapError::Publish {
            reference: "127.0.0.1:1/wrap/x".to_string(),
            message: "connection refused".to_string(),
        };
        assert_eq!(status_for(&composition), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(status_for(&publish), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_error_response_is_plain_text() {
        let err = WrapError::MalformedRequest("invalid target image format".to_string());
        let response = error_response(&err);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );
    }
}
