//! JSON failure responses: `{success: false, message, errors?}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{error, warn};

use crate::batch::FileFailure;
use crate::error::{ArchiveError, BatchError, StorageError, UploadError, ValidationError};

/// Failure of a request, carrying the status it maps to.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    errors: Option<Vec<FileFailure>>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    success: bool,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<&'a [FileFailure]>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            errors: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(StatusCode::PAYLOAD_TOO_LARGE, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn with_errors(mut self, errors: Vec<FileFailure>) -> Self {
        self.errors = Some(errors);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Maps a batch-level failure. A batch where every file was rejected for a
    /// bad option is the client's fault; any codec failure makes it a 500.
    pub fn from_batch(err: BatchError, failure_message: &str) -> Self {
        match err {
            BatchError::Empty => Self::bad_request(err.to_string()),
            BatchError::AllFailed { failures } => {
                let all_validation = failures.iter().all(|f| f.validation);
                let message = match failures.as_slice() {
                    [only] if only.validation => only.error.clone(),
                    _ => failure_message.to_string(),
                };
                let base = if all_validation {
                    Self::bad_request(message)
                } else {
                    Self::internal(message)
                };
                base.with_errors(failures)
            }
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        Self::bad_request(err.to_string())
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::TooLarge { .. } => Self::payload_too_large(err.to_string()),
            StorageError::Interrupted { .. } => Self::bad_request(err.to_string()),
            other => Self::internal(other.to_string()),
        }
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::Storage(inner) => Self::from(inner),
            UploadError::BodyTooLarge => Self::payload_too_large(err.to_string()),
            other => Self::bad_request(other.to_string()),
        }
    }
}

impl From<ArchiveError> for ApiError {
    fn from(err: ArchiveError) -> Self {
        Self::internal(format!("Failed to build archive: {}", err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = self.status.as_u16(), "{}", self.message);
        } else {
            warn!(status = self.status.as_u16(), "{}", self.message);
        }

        let body = ErrorBody {
            success: false,
            message: &self.message,
            errors: self.errors.as_deref(),
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(name: &str, validation: bool) -> FileFailure {
        FileFailure {
            filename: name.to_string(),
            error: format!("{} is broken", name),
            validation,
        }
    }

    #[test]
    fn test_too_large_maps_to_413() {
        let err = ApiError::from(UploadError::Storage(StorageError::TooLarge {
            name: "big.pdf".to_string(),
            limit: 10,
        }));
        assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_upload_errors_map_to_400() {
        let err = ApiError::from(UploadError::TooManyFiles {
            field: "images",
            max: 20,
        });
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.message(), "Too many files: at most 20 allowed in field 'images'");
    }

    #[test]
    fn test_all_validation_failures_are_client_errors() {
        let err = ApiError::from_batch(
            BatchError::AllFailed {
                failures: vec![failure("a.pdf", true)],
            },
            "Failed to split PDF",
        );
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.message(), "a.pdf is broken");
    }

    #[test]
    fn test_codec_failure_is_server_error() {
        let err = ApiError::from_batch(
            BatchError::AllFailed {
                failures: vec![failure("a.pdf", true), failure("b.pdf", false)],
            },
            "Failed to compress PDFs",
        );
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message(), "Failed to compress PDFs");
        assert_eq!(err.errors.as_ref().map(Vec::len), Some(2));
    }
}
