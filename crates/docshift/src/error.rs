use std::path::PathBuf;
use thiserror::Error;

use crate::batch::FileFailure;

#[derive(Error, Debug)]
pub enum DocshiftError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

/// An option or input value outside the domain a transform accepts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid {field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum TransformError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),

    #[error("Failed to read input '{path}': {source}")]
    ReadInput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write output '{path}': {source}")]
    WriteOutput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to process PDF: {0}")]
    Pdf(String),

    #[error("Failed to process Word document: {0}")]
    Docx(String),

    #[error("Failed to process image: {0}")]
    Image(String),
}

impl TransformError {
    pub fn is_validation(&self) -> bool {
        matches!(self, TransformError::Validation(_))
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File '{name}' exceeds the {limit} byte upload limit")]
    TooLarge { name: String, limit: u64 },

    #[error("Upload of '{name}' was interrupted: {reason}")]
    Interrupted { name: String, reason: String },

    #[error("File already exists: {0}")]
    FileExists(PathBuf),
}

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("No files were provided")]
    Empty,

    #[error("All {} files failed to process", failures.len())]
    AllFailed { failures: Vec<FileFailure> },
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("No completed outputs to archive")]
    NothingToArchive,

    #[error("Archive I/O failed for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ZIP encoding failed: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Archive task aborted: {0}")]
    Aborted(String),
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Malformed multipart body: {0}")]
    Multipart(String),

    #[error("Request body exceeds the upload limit")]
    BodyTooLarge,

    #[error("No {noun} file uploaded")]
    MissingFiles { noun: &'static str },

    #[error("Too many files: at most {max} allowed in field '{field}'")]
    TooManyFiles { field: &'static str, max: usize },

    #[error("Unexpected file field '{0}'")]
    UnexpectedField(String),

    #[error("Invalid file type for '{name}'. Only PDF, image, and Word files are allowed.")]
    RejectedType { name: String },

    #[error("File extension of '{name}' does not match its {expected} content type")]
    ExtensionMismatch { name: String, expected: &'static str },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, DocshiftError>;
