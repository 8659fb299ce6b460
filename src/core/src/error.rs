use thiserror::Error;

/// Step of the composition pipeline that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositionStage {
    /// Parsing an image config blob.
    ReadConfig,
    /// Appending the wrapper layer to the upstream image.
    AppendLayer,
    /// Writing the rewritten config back into the image.
    ApplyConfig,
}

impl std::fmt::Display for CompositionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadConfig => write!(f, "read-config"),
            Self::AppendLayer => write!(f, "append-layer"),
            Self::ApplyConfig => write!(f, "apply-config"),
        }
    }
}

/// wrapd error types
#[derive(Error, Debug)]
pub enum WrapError {
    /// Request path does not follow the wrap grammar
    #[error("Malformed wrap request: {0}")]
    MalformedRequest(String),

    /// Image reference could not be parsed
    #[error("Invalid image reference '{reference}': {message}")]
    InvalidReference { reference: String, message: String },

    /// Pulling an image from its registry failed
    #[error("Failed to resolve image {reference}: {message}")]
    Resolution { reference: String, message: String },

    /// Wrapper image was not built the way the proxy expects
    #[error("Wrapper configuration error: {0}")]
    WrapperConfig(String),

    /// A composition step failed
    #[error("Composition failed at {stage}: {message}")]
    Composition {
        stage: CompositionStage,
        message: String,
    },

    /// Pushing the composed image to the backing store failed
    #[error("Failed to publish {reference}: {message}")]
    Publish { reference: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl WrapError {
    /// Shorthand for a composition error at `stage`.
    pub fn composition(stage: CompositionStage, message: impl Into<String>) -> Self {
        Self::Composition {
            stage,
            message: message.into(),
        }
    }

    /// Whether the error was caused by the client's request rather than the proxy.
    ///
    /// Only a path that does not fit the wrap grammar counts; a path that
    /// parses into an unusable image reference is reported as our failure.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::MalformedRequest(_))
    }
}

impl From<serde_json::Error> for WrapError {
    fn from(err: serde_json::Error) -> Self {
        WrapError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for WrapError {
    fn from(err: serde_yaml::Error) -> Self {
        WrapError::Serialization(err.to_string())
    }
}

/// Result type alias for wrapd operations
pub type Result<T> = std::result::Result<T, WrapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_request_display() {
        let error = WrapError::MalformedRequest("invalid upstream image format".to_string());
        assert_eq!(
            error.to_string(),
            "Malformed wrap request: invalid upstream image format"
        );
    }

    #[test]
    fn test_resolution_error_display() {
        let error = WrapError::Resolution {
            reference: "ghcr.io/org/app:1.0".to_string(),
            message: "manifest unknown".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Failed to resolve image ghcr.io/org/app:1.0: manifest unknown"
        );
    }

    #[test]
    fn test_composition_error_names_stage() {
        let error = WrapError::composition(CompositionStage::AppendLayer, "diff_ids mismatch");
        assert_eq!(
            error.to_string(),
            "Composition failed at append-layer: diff_ids mismatch"
        );
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(CompositionStage::ReadConfig.to_string(), "read-config");
        assert_eq!(CompositionStage::ApplyConfig.to_string(), "apply-config");
    }

    #[test]
    fn test_wrapper_config_display() {
        let error = WrapError::WrapperConfig("wrapper image has no layers".to_string());
        assert_eq!(
            error.to_string(),
            "Wrapper configuration error: wrapper image has no layers"
        );
    }

    #[test]
    fn test_client_error_classification() {
        assert!(WrapError::MalformedRequest("x".to_string()).is_client_error());
        assert!(!WrapError::InvalidReference {
            reference: "x".to_string(),
            message: "y".to_string(),
        }
        .is_client_error());
        assert!(!WrapError::WrapperConfig("x".to_string()).is_client_error());
        assert!(!WrapError::Publish {
            reference: "x".to_string(),
            message: "y".to_string(),
        }
        .is_client_error());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use");
        let error: WrapError = io_error.into();
        assert!(matches!(error, WrapError::Io(_)));
        assert!(error.to_string().contains("address in use"));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope");
        let error: WrapError = result.unwrap_err().into();
        assert!(matches!(error, WrapError::Serialization(_)));
    }

    #[test]
    fn test_serde_yaml_error_conversion() {
        let result: std::result::Result<serde_yaml::Value, _> =
            serde_yaml::from_str("invalid: yaml: content:");
        let error: WrapError = result.unwrap_err().into();
        assert!(matches!(error, WrapError::Serialization(_)));
    }
}
