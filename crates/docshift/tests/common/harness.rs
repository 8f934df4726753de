//! In-process HTTP harness.
//!
//! Every `TestServer` owns a temp directory used as its scratch root, so a
//! test can assert that nothing is left behind once a response has been read.

#![allow(dead_code)]

use std::io::{Cursor, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::Router;
use tempfile::TempDir;
use tower::ServiceExt;

use docshift::{build_router, AppState, ServerConfig};

const BOUNDARY: &str = "docshift-test-boundary";

/// Builder for `multipart/form-data` request bodies.
#[derive(Default)]
pub struct MultipartForm {
    body: Vec<u8>,
}

impl MultipartForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
        self
    }

    pub fn file(mut self, name: &str, file_name: &str, content_type: &str, content: &[u8]) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                BOUNDARY, name, file_name, content_type
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(content);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    fn finish(mut self) -> Vec<u8> {
        self.body
            .extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        self.body
    }
}

/// A fully buffered response.
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("Response body is not JSON")
    }

    /// Entry names of a ZIP body, in archive order.
    pub fn zip_entries(&self) -> Vec<String> {
        let mut archive = zip::ZipArchive::new(Cursor::new(self.body.as_slice()))
            .expect("Response body is not a ZIP archive");
        (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect()
    }

    pub fn zip_entry(&self, name: &str) -> Vec<u8> {
        let mut archive = zip::ZipArchive::new(Cursor::new(self.body.as_slice()))
            .expect("Response body is not a ZIP archive");
        let mut entry = archive.by_name(name).expect("Missing ZIP entry");
        let mut content = Vec::new();
        entry.read_to_end(&mut content).unwrap();
        content
    }

    /// The `filename` parameter of `Content-Disposition`.
    pub fn attachment_name(&self) -> Option<String> {
        let disposition = self.header(header::CONTENT_DISPOSITION.as_str())?;
        let start = disposition.find("filename=\"")? + "filename=\"".len();
        let end = disposition[start..].find('"')? + start;
        Some(disposition[start..end].to_string())
    }
}

/// Router plus an isolated scratch root.
pub struct TestServer {
    temp_dir: TempDir,
    pub scratch: PathBuf,
    router: Router,
}

impl TestServer {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(customize: impl FnOnce(&mut ServerConfig)) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let scratch = temp_dir.path().join("scratch");

        let mut config = ServerConfig {
            scratch_directory: scratch.clone(),
            concurrency: 2,
            ..ServerConfig::default()
        };
        customize(&mut config);

        let router = build_router(Arc::new(AppState::new(config)));
        Self {
            temp_dir,
            scratch,
            router,
        }
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        let request = Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    pub async fn post(&self, uri: &str, form: MultipartForm) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(form.finish()))
            .unwrap();
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        TestResponse {
            status,
            headers,
            body: body.to_vec(),
        }
    }

    /// Whatever is left below the scratch root once pending cleanup has had
    /// a chance to finish. Scopes dropped on error paths are removed on the
    /// blocking pool, so this polls for a short while before giving up.
    pub async fn scratch_entries(&self) -> Vec<PathBuf> {
        let mut entries = self.list_scratch();
        for _ in 0..100 {
            if entries.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            entries = self.list_scratch();
        }
        entries
    }

    fn list_scratch(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(&self.scratch) {
            Ok(entries) => entries.filter_map(|e| e.ok().map(|e| e.path())).collect(),
            Err(_) => Vec::new(),
        }
    }
}
