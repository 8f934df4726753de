use std::sync::Arc;

use axum::{
    extract::{Multipart, State},
    response::Response,
};
use tracing::{info, Instrument};

use crate::archive::{archive_name, deliver};
use crate::batch::TracingProgress;
use crate::error::{UploadError, ValidationError};
use crate::http::errors::ApiError;
use crate::http::multipart::{collect_upload, UploadSpec};
use crate::http::response::download;
use crate::http::AppState;
use crate::transform::{
    AdvancedCompressOptions, FormFields, ImageCompress, ImageCompressOptions, ImageConvert,
    ImageConvertOptions, OutputMode, PdfCompress, PdfCompressAdvanced, PdfRotate, PdfSplit,
    PdfToWord, RotateOptions, SplitOptions, Transform, WordToPdf,
};

type BuildTransform = fn(&FormFields) -> Result<Arc<dyn Transform>, ValidationError>;

/// One conversion endpoint: where its files come from, how its transform is
/// built from the form options and how the result is named.
#[derive(Clone, Copy)]
pub struct Operation {
    pub field: &'static str,
    pub noun: &'static str,
    /// Batch endpoints take up to `max_batch_files` parts and honor `outputMode`.
    pub batch: bool,
    pub archive_prefix: &'static str,
    pub failure_message: &'static str,
    build: BuildTransform,
}

pub const PDF_COMPRESS: Operation = Operation {
    field: "pdf",
    noun: "PDF",
    batch: false,
    archive_prefix: "compressed-pdfs",
    failure_message: "Failed to compress PDF",
    build: pdf_compress,
};

pub const PDF_COMPRESS_ADVANCED: Operation = Operation {
    field: "pdf",
    noun: "PDF",
    batch: false,
    archive_prefix: "compressed-pdfs",
    failure_message: "Failed to compress PDF",
    build: pdf_compress_advanced,
};

pub const PDF_COMPRESS_BATCH: Operation = Operation {
    field: "pdfs",
    noun: "PDF",
    batch: true,
    archive_prefix: "compressed-pdfs",
    failure_message: "Failed to compress PDFs",
    build: pdf_compress_advanced,
};

pub const PDF_SPLIT: Operation = Operation {
    field: "pdf",
    noun: "PDF",
    batch: false,
    archive_prefix: "split-pdfs",
    failure_message: "Failed to split PDF",
    build: pdf_split,
};

pub const PDF_ROTATE: Operation = Operation {
    field: "pdf",
    noun: "PDF",
    batch: false,
    archive_prefix: "rotated-pdfs",
    failure_message: "Failed to rotate PDF",
    build: pdf_rotate,
};

pub const PDF_TO_WORD: Operation = Operation {
    field: "pdf",
    noun: "PDF",
    batch: false,
    archive_prefix: "converted-documents",
    failure_message: "Failed to convert PDF to Word",
    build: pdf_to_word,
};

pub const WORD_TO_PDF: Operation = Operation {
    field: "word",
    noun: "Word",
    batch: false,
    archive_prefix: "converted-documents",
    failure_message: "Failed to convert Word to PDF",
    build: word_to_pdf,
};

pub const IMAGE_CONVERT: Operation = Operation {
    field: "image",
    noun: "image",
    batch: false,
    archive_prefix: "converted-images",
    failure_message: "Failed to convert image",
    build: image_convert,
};

pub const IMAGE_CONVERT_BATCH: Operation = Operation {
    field: "images",
    noun: "image",
    batch: true,
    archive_prefix: "converted-images",
    failure_message: "Failed to convert images",
    build: image_convert,
};

pub const IMAGE_COMPRESS: Operation = Operation {
    field: "image",
    noun: "image",
    batch: false,
    archive_prefix: "compressed-images",
    failure_message: "Failed to compress image",
    build: image_compress,
};

pub const IMAGE_COMPRESS_BATCH: Operation = Operation {
    field: "images",
    noun: "image",
    batch: true,
    archive_prefix: "compressed-images",
    failure_message: "Failed to compress images",
    build: image_compress,
};

fn pdf_compress(_: &FormFields) -> Result<Arc<dyn Transform>, ValidationError> {
    Ok(Arc::new(PdfCompress))
}

fn pdf_compress_advanced(fields: &FormFields) -> Result<Arc<dyn Transform>, ValidationError> {
    let options = AdvancedCompressOptions::from_fields(fields)?;
    Ok(Arc::new(PdfCompressAdvanced::new(options)))
}

fn pdf_split(fields: &FormFields) -> Result<Arc<dyn Transform>, ValidationError> {
    Ok(Arc::new(PdfSplit::new(SplitOptions::from_fields(fields)?)))
}

fn pdf_rotate(fields: &FormFields) -> Result<Arc<dyn Transform>, ValidationError> {
    Ok(Arc::new(PdfRotate::new(RotateOptions::from_fields(fields)?)))
}

fn pdf_to_word(_: &FormFields) -> Result<Arc<dyn Transform>, ValidationError> {
    Ok(Arc::new(PdfToWord))
}

fn word_to_pdf(_: &FormFields) -> Result<Arc<dyn Transform>, ValidationError> {
    Ok(Arc::new(WordToPdf))
}

fn image_convert(fields: &FormFields) -> Result<Arc<dyn Transform>, ValidationError> {
    Ok(Arc::new(ImageConvert::new(ImageConvertOptions::from_fields(fields)?)))
}

fn image_compress(fields: &FormFields) -> Result<Arc<dyn Transform>, ValidationError> {
    Ok(Arc::new(ImageCompress::new(ImageCompressOptions::from_fields(fields)?)))
}

/// Upload, transform every file, package and stream. The batch scope lives
/// until the response body is done with it; every early return drops it and
/// removes the batch directory.
pub async fn run_operation(
    state: &AppState,
    multipart: Multipart,
    operation: Operation,
) -> Result<Response, ApiError> {
    let scope = state.store.begin_batch().await?;
    let span = tracing::info_span!(
        "http.operation",
        batch_id = %scope.id(),
        field = operation.field,
    );

    let work = async {
        let spec = UploadSpec {
            field: operation.field,
            max_files: if operation.batch {
                state.config.max_batch_files
            } else {
                1
            },
        };
        let upload = collect_upload(multipart, &scope, spec).await?;
        if upload.files.is_empty() {
            return Err(ApiError::from(UploadError::MissingFiles {
                noun: operation.noun,
            }));
        }

        let transform = (operation.build)(&upload.fields)?;
        let mode = if operation.batch {
            OutputMode::from_fields(&upload.fields)?
        } else {
            OutputMode::Individual
        };
        info!(
            transform = %transform.kind(),
            files = upload.files.len(),
            "Starting batch"
        );

        let result = state
            .runner
            .run(transform, upload.files, &scope, &TracingProgress)
            .await
            .map_err(|e| ApiError::from_batch(e, operation.failure_message))?;

        let name = archive_name(operation.archive_prefix);
        let deliverable = deliver(&result, mode, &scope, &name).await?;
        Ok::<_, ApiError>((deliverable, result))
    };
    let (deliverable, result) = work.instrument(span.clone()).await?;

    download(deliverable, &result, scope).instrument(span).await
}

macro_rules! operation_handler {
    ($name:ident, $operation:expr) => {
        pub async fn $name(
            State(state): State<Arc<AppState>>,
            multipart: Multipart,
        ) -> Result<Response, ApiError> {
            run_operation(&state, multipart, $operation).await
        }
    };
}

operation_handler!(compress_pdf, PDF_COMPRESS);
operation_handler!(compress_pdf_advanced, PDF_COMPRESS_ADVANCED);
operation_handler!(compress_pdf_batch, PDF_COMPRESS_BATCH);
operation_handler!(split_pdf, PDF_SPLIT);
operation_handler!(rotate_pdf, PDF_ROTATE);
operation_handler!(pdf_to_word_handler, PDF_TO_WORD);
operation_handler!(word_to_pdf_handler, WORD_TO_PDF);
operation_handler!(convert_image, IMAGE_CONVERT);
operation_handler!(convert_image_batch, IMAGE_CONVERT_BATCH);
operation_handler!(compress_image, IMAGE_COMPRESS);
operation_handler!(compress_image_batch, IMAGE_COMPRESS_BATCH);
