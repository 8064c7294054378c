//! Error types for the image service

use thiserror::Error;

/// Result type alias for image service operations
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Closed set of failures the service can report
///
/// Each variant maps to exactly one HTTP status at the request boundary
/// (see [`ServiceError::kind`] and `http::errors`).
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Client input rejected before any file is written
    #[error("{0}")]
    InvalidInput(String),

    /// Upload bytes are not a decodable image
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// Model name is not part of the catalog
    #[error("Unsupported model: {0}")]
    UnsupportedModel(String),

    /// Upload exceeds the configured size limit
    #[error("Upload too large: {0}")]
    PayloadTooLarge(String),

    /// Catalog model whose weights are not installed locally
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// Inference queue is saturated
    #[error("Service busy: {0}")]
    Busy(String),

    /// Backend or inference failure
    #[error("Model invocation failed: {0}")]
    ModelInvocation(String),

    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Model download failures
    #[error("Network error: {0}")]
    Network(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ServiceError {
    /// Create a new invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new invalid image error
    pub fn invalid_image<S: Into<String>>(msg: S) -> Self {
        Self::InvalidImage(msg.into())
    }

    /// Create a new unsupported model error
    pub fn unsupported_model<S: Into<String>>(model: S) -> Self {
        Self::UnsupportedModel(model.into())
    }

    /// Create a new payload size error
    pub fn payload_too_large<S: Into<String>>(msg: S) -> Self {
        Self::PayloadTooLarge(msg.into())
    }

    /// Create a new model unavailable error
    pub fn model_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::ModelUnavailable(msg.into())
    }

    /// Create a new busy error
    pub fn busy<S: Into<String>>(msg: S) -> Self {
        Self::Busy(msg.into())
    }

    /// Create a new model invocation error
    pub fn model_invocation<S: Into<String>>(msg: S) -> Self {
        Self::ModelInvocation(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a network error with the underlying cause
    pub fn network_error<S: Into<String>, E: std::fmt::Display>(context: S, error: E) -> Self {
        Self::Network(format!("{}: {}", context.into(), error))
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        let path_display = path.as_ref().display();
        Self::Io(std::io::Error::new(
            error.kind(),
            format!("Failed to {} '{}': {}", operation, path_display, error),
        ))
    }

    /// Stable machine-readable identifier for the error kind
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::InvalidImage(_) => "invalid_image",
            Self::UnsupportedModel(_) => "unsupported_model",
            Self::PayloadTooLarge(_) => "payload_too_large",
            Self::ModelUnavailable(_) => "model_unavailable",
            Self::Busy(_) => "busy",
            Self::ModelInvocation(_) => "model_invocation_failed",
            Self::Io(_) => "io",
            Self::Network(_) => "network",
            Self::InvalidConfig(_) => "invalid_config",
        }
    }

    /// Whether the failure was caused by the caller's input
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput(_)
                | Self::InvalidImage(_)
                | Self::UnsupportedModel(_)
                | Self::PayloadTooLarge(_)
        )
    }
}

impl From<image::ImageError> for ServiceError {
    fn from(error: image::ImageError) -> Self {
        match error {
            image::ImageError::IoError(io) => Self::Io(io),
            other => Self::InvalidImage(other.to_string()),
        }
    }
}
