//! Multipart upload extraction and validation

use crate::error::{Result, ServiceError};
use axum::body::Bytes;
use axum::extract::multipart::{Multipart, MultipartError, MultipartRejection};
use axum::http::StatusCode;

/// Form part carrying the image
pub const FILE_FIELD: &str = "file";
/// Optional form part naming the model
pub const MODEL_FIELD: &str = "model";

/// A validated image upload
#[derive(Debug, Clone)]
pub struct Upload {
    pub bytes: Bytes,
    pub content_type: String,
    pub file_name: Option<String>,
    /// Model named in the form body, if any
    pub model: Option<String>,
}

fn multipart_error(error: &MultipartError) -> ServiceError {
    if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ServiceError::payload_too_large(error.body_text())
    } else {
        ServiceError::invalid_input(format!("Malformed multipart body: {}", error.body_text()))
    }
}

/// Read the `file` and `model` parts and validate the upload
///
/// Nothing is written to disk here; a rejected upload leaves no trace.
///
/// # Errors
/// - `InvalidInput` for non-multipart bodies, a missing file part, or a
///   declared content type outside `image/*`
/// - `PayloadTooLarge` when the body exceeds the configured limit
/// - `InvalidImage` when `sniff` is on and the bytes are not a known format
pub async fn read_upload(
    multipart: std::result::Result<Multipart, MultipartRejection>,
    sniff: bool,
) -> Result<Upload> {
    let mut multipart = multipart.map_err(|rejection| {
        ServiceError::invalid_input(format!("Expected a multipart form: {}", rejection.body_text()))
    })?;

    let mut file = None;
    let mut model = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| multipart_error(&e))? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some(FILE_FIELD) if file.is_none() => {
                let content_type = field.content_type().map(str::to_owned);
                let file_name = field.file_name().map(str::to_owned);
                let bytes = field.bytes().await.map_err(|e| multipart_error(&e))?;
                file = Some((content_type, file_name, bytes));
            },
            Some(MODEL_FIELD) => {
                let value = field.text().await.map_err(|e| multipart_error(&e))?;
                let value = value.trim();
                if !value.is_empty() {
                    model = Some(value.to_string());
                }
            },
            _ => {},
        }
    }

    let Some((content_type, file_name, bytes)) = file else {
        return Err(ServiceError::invalid_input("No file part in request"));
    };

    let content_type = content_type.unwrap_or_default();
    if !content_type.starts_with("image/") {
        return Err(ServiceError::invalid_input("File must be an image"));
    }

    if sniff {
        image::guess_format(&bytes).map_err(|_| {
            ServiceError::invalid_image("upload content is not a recognised image format")
        })?;
    }

    Ok(Upload {
        bytes,
        content_type,
        file_name,
        model,
    })
}
