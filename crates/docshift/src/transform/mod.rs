pub mod image;
pub mod options;
pub mod pdf;
pub mod word;

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::error::{StorageError, TransformError, ValidationError};
use crate::sanitize;
use crate::store::{OutputDir, UploadedFile};

pub use self::image::{ImageCompress, ImageConvert};
pub use options::{
    AdvancedCompressOptions, CompressionLevel, FormFields, ImageCompressOptions,
    ImageConvertOptions, ImageFormat, OutputMode, RotateOptions, SplitOptions,
};
pub use pdf::{PdfCompress, PdfCompressAdvanced, PdfRotate, PdfSplit, PdfToWord};
pub use word::WordToPdf;

pub const PDF_MIME: &str = "application/pdf";
pub const DOCX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const DOC_MIME: &str = "application/msword";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransformKind {
    PdfCompress,
    PdfCompressAdvanced,
    PdfSplit,
    PdfRotate,
    PdfToWord,
    WordToPdf,
    ImageConvert,
    ImageCompress,
}

impl TransformKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransformKind::PdfCompress => "pdf-compress",
            TransformKind::PdfCompressAdvanced => "pdf-compress-advanced",
            TransformKind::PdfSplit => "pdf-split",
            TransformKind::PdfRotate => "pdf-rotate",
            TransformKind::PdfToWord => "pdf-to-word",
            TransformKind::WordToPdf => "word-to-pdf",
            TransformKind::ImageConvert => "image-convert",
            TransformKind::ImageCompress => "image-compress",
        }
    }
}

impl fmt::Display for TransformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a transform reads: the stored upload plus the name the client sent.
#[derive(Debug, Clone)]
pub struct TransformInput {
    pub path: PathBuf,
    pub mime_type: String,
    pub original_name: String,
}

impl From<&UploadedFile> for TransformInput {
    fn from(file: &UploadedFile) -> Self {
        Self {
            path: file.storage_path.clone(),
            mime_type: file.mime_type.clone(),
            original_name: file.original_name.clone(),
        }
    }
}

impl TransformInput {
    pub fn extension(&self) -> Option<String> {
        sanitize::extension_of(&self.original_name)
    }

    /// MIME type as declared by the client, or guessed from the name when the
    /// client sent nothing useful.
    pub fn effective_mime(&self) -> String {
        let declared = self.mime_type.trim().to_ascii_lowercase();
        if declared.is_empty() || declared == "application/octet-stream" {
            mime_guess::from_path(&self.original_name)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        } else {
            declared
        }
    }

    pub fn is_pdf(&self) -> bool {
        self.effective_mime() == PDF_MIME || self.extension().as_deref() == Some("pdf")
    }

    pub fn is_image(&self) -> bool {
        self.effective_mime().starts_with("image/")
    }

    pub fn is_word(&self) -> bool {
        let mime = self.effective_mime();
        mime == DOCX_MIME
            || mime == DOC_MIME
            || matches!(self.extension().as_deref(), Some("docx") | Some("doc"))
    }

    pub fn read(&self) -> Result<Vec<u8>, TransformError> {
        std::fs::read(&self.path).map_err(|e| TransformError::ReadInput {
            path: self.path.clone(),
            source: e,
        })
    }
}

/// A generated file, written into the batch's output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOutput {
    pub path: PathBuf,
    pub file_name: String,
    pub mime_type: String,
}

/// A single-file conversion. Implementations are stateless apart from their
/// options, so one instance is shared by every file in a batch.
pub trait Transform: Send + Sync {
    fn kind(&self) -> TransformKind;

    /// Reads `input`, writes exactly one new file into `out` and describes it.
    /// The input file is never modified.
    fn apply(&self, input: &TransformInput, out: &OutputDir)
        -> Result<TransformOutput, TransformError>;
}

pub(crate) fn require_pdf(input: &TransformInput) -> Result<(), TransformError> {
    if input.is_pdf() {
        Ok(())
    } else {
        Err(ValidationError::new("file", format!("'{}' is not a PDF", input.original_name)).into())
    }
}

pub(crate) fn require_image(input: &TransformInput) -> Result<(), TransformError> {
    if input.is_image() {
        Ok(())
    } else {
        Err(ValidationError::new("file", format!("'{}' is not an image", input.original_name))
            .into())
    }
}

pub(crate) fn require_word(input: &TransformInput) -> Result<(), TransformError> {
    if input.is_word() {
        Ok(())
    } else {
        Err(ValidationError::new(
            "file",
            format!("'{}' is not a Word document", input.original_name),
        )
        .into())
    }
}

/// `compressed-report.pdf` style names.
pub fn prefixed_name(prefix: &str, original_name: &str) -> String {
    format!("{}-{}", prefix, sanitize::clean_file_name(original_name))
}

/// Replaces the extension of `original_name` with `extension`.
pub fn with_extension(original_name: &str, extension: &str) -> String {
    let cleaned = sanitize::clean_file_name(original_name);
    let (stem, _) = sanitize::split_extension(&cleaned);
    format!("{}.{}", stem, extension)
}

pub(crate) fn write_output(
    out: &OutputDir,
    file_name: String,
    mime_type: &str,
    content: &[u8],
) -> Result<TransformOutput, TransformError> {
    let path = out.write(&file_name, content).map_err(storage_to_transform)?;
    Ok(TransformOutput {
        path,
        file_name,
        mime_type: mime_type.to_string(),
    })
}

/// Opens a fresh output file for codecs that stream their result.
pub(crate) fn create_output(
    out: &OutputDir,
    file_name: &str,
) -> Result<(PathBuf, std::fs::File), TransformError> {
    out.create(file_name).map_err(storage_to_transform)
}

pub(crate) fn storage_to_transform(e: StorageError) -> TransformError {
    match e {
        StorageError::WriteFile { path, source } | StorageError::CreateDirectory { path, source } => {
            TransformError::WriteOutput { path, source }
        }
        StorageError::FileExists(path) => TransformError::WriteOutput {
            path,
            source: std::io::Error::from(std::io::ErrorKind::AlreadyExists),
        },
        other => TransformError::WriteOutput {
            path: PathBuf::new(),
            source: std::io::Error::other(other.to_string()),
        },
    }
}
