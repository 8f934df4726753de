use axum::extract::multipart::{Multipart, MultipartError};
use axum::http::StatusCode;
use tracing::debug;

use crate::error::UploadError;
use crate::sanitize;
use crate::store::{BatchScope, UploadedFile};
use crate::transform::{FormFields, DOCX_MIME, DOC_MIME};

/// Content types accepted by the upload gate.
pub const ALLOWED_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/webp",
    "image/gif",
    "image/bmp",
    "image/tiff",
    DOCX_MIME,
    DOC_MIME,
];

const OCTET_STREAM: &str = "application/octet-stream";

/// Which file field a route reads and how many parts it takes.
#[derive(Debug, Clone, Copy)]
pub struct UploadSpec {
    pub field: &'static str,
    pub max_files: usize,
}

/// Everything a multipart request carried: the stored files in arrival order
/// and the scalar option fields.
#[derive(Debug, Default)]
pub struct Upload {
    pub files: Vec<UploadedFile>,
    pub fields: FormFields,
}

/// Drains the multipart body, streaming every file part into `scope`.
///
/// Parts are accepted under `field` or `field[]`. Any other file field, a
/// rejected type or more than `max_files` parts fails the whole request.
/// Scalar parts become [`FormFields`]; unknown scalars are kept and ignored
/// by the option parsers.
pub async fn collect_upload(
    mut multipart: Multipart,
    scope: &BatchScope,
    spec: UploadSpec,
) -> Result<Upload, UploadError> {
    let mut upload = Upload::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field_name(field.name().unwrap_or_default()).to_string();

        let Some(file_name) = field.file_name().map(str::to_string) else {
            let value = field.text().await.map_err(multipart_error)?;
            upload.fields.insert(name, value);
            continue;
        };

        if name != spec.field {
            return Err(UploadError::UnexpectedField(name));
        }
        if upload.files.len() >= spec.max_files {
            return Err(UploadError::TooManyFiles {
                field: spec.field,
                max: spec.max_files,
            });
        }

        let mime_type = field.content_type().unwrap_or(OCTET_STREAM).to_string();
        check_type(&file_name, &mime_type)?;

        let stored = scope
            .store(&file_name, &mime_type, Box::pin(field))
            .await?;
        debug!(
            batch_id = %scope.id(),
            file = %stored.original_name,
            size = stored.size_bytes,
            "Stored upload"
        );
        upload.files.push(stored);
    }

    Ok(upload)
}

/// `images[]` and `images` name the same field.
fn field_name(raw: &str) -> &str {
    raw.strip_suffix("[]").unwrap_or(raw)
}

/// Word files are recognized by extension whatever their declared type;
/// everything else must carry an allowed type, and the Word content types
/// must agree with the extension.
pub fn check_type(file_name: &str, mime_type: &str) -> Result<(), UploadError> {
    let extension = sanitize::extension_of(file_name);
    if matches!(extension.as_deref(), Some("docx") | Some("doc")) {
        return Ok(());
    }

    let mime_type = mime_type.to_ascii_lowercase();
    if !ALLOWED_MIME_TYPES.contains(&mime_type.as_str()) {
        return Err(UploadError::RejectedType {
            name: file_name.to_string(),
        });
    }

    let expected = match mime_type.as_str() {
        DOCX_MIME => Some("DOCX"),
        DOC_MIME => Some("DOC"),
        _ => None,
    };
    match expected {
        Some(expected) => Err(UploadError::ExtensionMismatch {
            name: file_name.to_string(),
            expected,
        }),
        None => Ok(()),
    }
}

fn multipart_error(err: MultipartError) -> UploadError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        UploadError::BodyTooLarge
    } else {
        UploadError::Multipart(err.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_name_strips_array_suffix() {
        assert_eq!(field_name("images[]"), "images");
        assert_eq!(field_name("pdf"), "pdf");
    }

    #[test]
    fn test_allowed_types_pass() {
        assert!(check_type("scan.pdf", "application/pdf").is_ok());
        assert!(check_type("photo.JPG", "image/jpeg").is_ok());
        assert!(check_type("photo.tif", "image/tiff").is_ok());
    }

    #[test]
    fn test_word_files_pass_by_extension() {
        assert!(check_type("letter.docx", "application/octet-stream").is_ok());
        assert!(check_type("legacy.doc", "text/plain").is_ok());
    }

    #[test]
    fn test_unknown_type_rejected() {
        match check_type("notes.txt", "text/plain") {
            Err(UploadError::RejectedType { name }) => assert_eq!(name, "notes.txt"),
            other => panic!("Expected RejectedType, got {:?}", other),
        }
    }

    #[test]
    fn test_word_mime_with_wrong_extension() {
        match check_type("letter.pdf", DOCX_MIME) {
            Err(UploadError::ExtensionMismatch { expected, .. }) => assert_eq!(expected, "DOCX"),
            other => panic!("Expected ExtensionMismatch, got {:?}", other),
        }
        match check_type("letter", DOC_MIME) {
            Err(UploadError::ExtensionMismatch { expected, .. }) => assert_eq!(expected, "DOC"),
            other => panic!("Expected ExtensionMismatch, got {:?}", other),
        }
    }
}
