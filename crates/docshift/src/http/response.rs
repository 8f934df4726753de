use axum::{
    body::{Body, Bytes},
    http::{header, HeaderValue, StatusCode},
    response::Response,
};
use futures_util::{future, stream, Stream, StreamExt};
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::archive::Deliverable;
use crate::batch::BatchResult;
use crate::http::errors::ApiError;
use crate::sanitize;
use crate::store::BatchScope;

pub const HEADER_BATCH_TOTAL: &str = "x-batch-total";
pub const HEADER_BATCH_SUCCEEDED: &str = "x-batch-succeeded";
pub const HEADER_BATCH_FAILED: &str = "x-batch-failed";
pub const HEADER_BATCH_ERRORS: &str = "x-batch-errors";

const CHUNK_SIZE: usize = 64 * 1024;

/// Builds the download response for a finished batch.
///
/// The scope moves into the body stream. Its directory is removed once the
/// last chunk has been read, or when the body is dropped early because the
/// client went away.
pub async fn download(
    deliverable: Deliverable,
    result: &BatchResult,
    scope: BatchScope,
) -> Result<Response, ApiError> {
    let file = File::open(deliverable.path()).await.map_err(|e| {
        ApiError::internal(format!(
            "Failed to open '{}': {}",
            sanitize::redact_path(deliverable.path()),
            e
        ))
    })?;
    let length = file.metadata().await.ok().map(|m| m.len());

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, deliverable.mime_type())
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition(deliverable.file_name()),
        )
        .header(HEADER_BATCH_TOTAL, result.total())
        .header(HEADER_BATCH_SUCCEEDED, result.succeeded_count())
        .header(HEADER_BATCH_FAILED, result.failed_count());

    if let Some(length) = length {
        builder = builder.header(header::CONTENT_LENGTH, length);
    }

    let failures = result.failures();
    if !failures.is_empty() {
        let json = serde_json::to_string(&failures)
            .map_err(|e| ApiError::internal(format!("Failed to encode failures: {}", e)))?;
        let value = HeaderValue::from_str(&sanitize::ascii_json(&json))
            .map_err(|e| ApiError::internal(format!("Invalid failure header: {}", e)))?;
        builder = builder.header(HEADER_BATCH_ERRORS, value);
    }

    debug!(
        batch_id = %scope.id(),
        file = %deliverable.file_name(),
        size = length.unwrap_or_default(),
        "Streaming download"
    );

    builder
        .body(Body::from_stream(scoped_stream(file, scope)))
        .map_err(|e| ApiError::internal(format!("Failed to build response: {}", e)))
}

/// `attachment; filename="<ascii>"; filename*=UTF-8''<pct-encoded>`
pub fn content_disposition(file_name: &str) -> String {
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        sanitize::ascii_fallback(file_name),
        urlencoding::encode(file_name)
    )
}

/// File chunks followed by a trailing step that closes the scope once the
/// reader is exhausted. Dropping the stream early drops the scope with it.
fn scoped_stream(file: File, scope: BatchScope) -> impl Stream<Item = std::io::Result<Bytes>> + Send {
    let release = stream::once(async move {
        scope.close().await;
        None::<std::io::Result<Bytes>>
    });

    ReaderStream::with_capacity(file, CHUNK_SIZE)
        .map(Some)
        .chain(release)
        .filter_map(future::ready)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ScratchStore;
    use futures_util::StreamExt;
    use tempfile::TempDir;

    #[test]
    fn test_content_disposition_ascii() {
        assert_eq!(
            content_disposition("report.pdf"),
            "attachment; filename=\"report.pdf\"; filename*=UTF-8''report.pdf"
        );
    }

    #[test]
    fn test_content_disposition_unicode() {
        assert_eq!(
            content_disposition("résumé 1.pdf"),
            "attachment; filename=\"r_sum_ 1.pdf\"; filename*=UTF-8''r%C3%A9sum%C3%A9%201.pdf"
        );
    }

    #[test]
    fn test_content_disposition_escapes_reserved_characters() {
        assert_eq!(
            content_disposition("a;b\"c.pdf"),
            "attachment; filename=\"a;b_c.pdf\"; filename*=UTF-8''a%3Bb%22c.pdf"
        );
    }

    async fn wait_until_removed(dir: &std::path::Path) -> bool {
        for _ in 0..100 {
            if !dir.exists() {
                return true;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_stream_releases_scope_at_end() {
        let temp = TempDir::new().unwrap();
        let scope = ScratchStore::new(temp.path(), 1 << 20).begin_batch().await.unwrap();
        let dir = scope.dir().to_path_buf();
        let path = scope.outputs().write("out.bin", &vec![7u8; CHUNK_SIZE + 10]).unwrap();

        let file = File::open(&path).await.unwrap();
        let chunks: Vec<Bytes> = scoped_stream(file, scope)
            .map(|c| c.unwrap())
            .collect()
            .await;

        assert!(chunks.len() >= 2);
        let body: Vec<u8> = chunks.concat();
        assert_eq!(body.len(), CHUNK_SIZE + 10);
        assert!(body.iter().all(|b| *b == 7));
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_dropped_stream_releases_scope() {
        let temp = TempDir::new().unwrap();
        let scope = ScratchStore::new(temp.path(), 1 << 20).begin_batch().await.unwrap();
        let dir = scope.dir().to_path_buf();
        let path = scope.outputs().write("out.bin", b"content").unwrap();

        let file = File::open(&path).await.unwrap();
        let stream = scoped_stream(file, scope);
        drop(stream);

        assert!(wait_until_removed(&dir).await);
    }
}
