use std::fmt::Display;
use std::io::Write;
use std::path::{Path, PathBuf};

use futures_util::{Stream, StreamExt};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::sanitize;

const INPUT_DIR: &str = "in";
const OUTPUT_DIR: &str = "out";

/// Root of the transient on-disk area. Every request works inside its own
/// batch directory below this root.
#[derive(Debug, Clone)]
pub struct ScratchStore {
    root: PathBuf,
    max_file_size: u64,
}

impl ScratchStore {
    pub fn new<P: AsRef<Path>>(root: P, max_file_size: u64) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            max_file_size,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Creates the namespace directory for a new batch.
    pub async fn begin_batch(&self) -> Result<BatchScope, StorageError> {
        let id = uuid::Uuid::new_v4().to_string();
        let dir = self.root.join(&id);

        for sub in [INPUT_DIR, OUTPUT_DIR] {
            let path = dir.join(sub);
            tokio::fs::create_dir_all(&path)
                .await
                .map_err(|e| StorageError::CreateDirectory { path, source: e })?;
        }

        debug!(batch_id = %id, "Opened batch scratch directory");

        Ok(BatchScope {
            id,
            dir,
            max_file_size: self.max_file_size,
            closed: false,
        })
    }
}

/// A client upload persisted to scratch storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub id: String,
    pub original_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    #[serde(skip)]
    pub storage_path: PathBuf,
}

/// Owns every file created for one request.
///
/// Dropping the scope deletes the whole batch directory, so cleanup happens on
/// every exit path: response streamed, error returned, or future cancelled.
#[derive(Debug)]
pub struct BatchScope {
    id: String,
    dir: PathBuf,
    max_file_size: u64,
    closed: bool,
}

impl BatchScope {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn outputs(&self) -> OutputDir {
        OutputDir::new(self.dir.join(OUTPUT_DIR))
    }

    /// Path for a batch-level artifact such as the ZIP archive.
    pub fn artifact_path(&self, name: &str) -> PathBuf {
        self.dir.join(sanitize::clean_file_name(name))
    }

    /// Streams an upload into the batch under a generated, collision-resistant
    /// name. The partial file is removed if the stream fails or exceeds the
    /// per-file limit.
    pub async fn store<S, B, E>(
        &self,
        original_name: &str,
        mime_type: &str,
        mut chunks: S,
    ) -> Result<UploadedFile, StorageError>
    where
        S: Stream<Item = Result<B, E>> + Unpin,
        B: AsRef<[u8]>,
        E: Display,
    {
        let original_name = sanitize::clean_file_name(original_name);
        let id = uuid::Uuid::new_v4().to_string();
        let stored_name = match sanitize::extension_of(&original_name) {
            Some(ext) => format!("{}-{}.{}", id, chrono::Utc::now().timestamp_millis(), ext),
            None => format!("{}-{}", id, chrono::Utc::now().timestamp_millis()),
        };
        let path = self.dir.join(INPUT_DIR).join(stored_name);

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| StorageError::WriteFile {
                path: path.clone(),
                source: e,
            })?;

        let mut size_bytes: u64 = 0;
        let outcome: Result<(), StorageError> = async {
            while let Some(chunk) = chunks.next().await {
                let chunk = chunk.map_err(|e| StorageError::Interrupted {
                    name: original_name.clone(),
                    reason: e.to_string(),
                })?;
                let bytes = chunk.as_ref();
                size_bytes += bytes.len() as u64;
                if size_bytes > self.max_file_size {
                    return Err(StorageError::TooLarge {
                        name: original_name.clone(),
                        limit: self.max_file_size,
                    });
                }
                file.write_all(bytes)
                    .await
                    .map_err(|e| StorageError::WriteFile {
                        path: path.clone(),
                        source: e,
                    })?;
            }
            file.flush().await.map_err(|e| StorageError::WriteFile {
                path: path.clone(),
                source: e,
            })
        }
        .await;

        drop(file);
        if let Err(e) = outcome {
            release(&path).await;
            return Err(e);
        }

        Ok(UploadedFile {
            id,
            original_name,
            mime_type: mime_type.to_string(),
            size_bytes,
            storage_path: path,
        })
    }

    /// Convenience wrapper around [`BatchScope::store`] for in-memory content.
    pub async fn store_bytes(
        &self,
        original_name: &str,
        mime_type: &str,
        content: &[u8],
    ) -> Result<UploadedFile, StorageError> {
        let chunks = futures_util::stream::iter([Ok::<_, std::convert::Infallible>(content)]);
        self.store(original_name, mime_type, chunks).await
    }

    /// Removes the batch directory now instead of at drop time.
    pub async fn close(mut self) {
        self.closed = true;
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => debug!(batch_id = %self.id, "Released batch scratch directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(batch_id = %self.id, "Failed to release batch directory: {}", e),
        }
    }
}

impl Drop for BatchScope {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let id = std::mem::take(&mut self.id);
        let dir = std::mem::take(&mut self.dir);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || remove_batch_dir(&id, &dir));
            }
            Err(_) => remove_batch_dir(&id, &dir),
        }
    }
}

fn remove_batch_dir(id: &str, dir: &Path) {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => debug!(batch_id = %id, "Released batch scratch directory"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(batch_id = %id, "Failed to release batch directory: {}", e),
    }
}

/// Idempotent delete. A missing file is fine; any other failure is logged and
/// swallowed so cleanup never masks the primary response.
pub async fn release(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Released {}", sanitize::redact_path(path)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to release {}: {}", sanitize::redact_path(path), e),
    }
}

/// Blocking variant of [`release`] for use inside transforms.
pub fn release_blocking(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Released {}", sanitize::redact_path(path)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to release {}: {}", sanitize::redact_path(path), e),
    }
}

/// Destination directory for transform outputs of one batch.
#[derive(Debug, Clone)]
pub struct OutputDir {
    dir: PathBuf,
}

impl OutputDir {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Writes `content` under `file_name`, numbering the name on conflict.
    pub fn write(&self, file_name: &str, content: &[u8]) -> Result<PathBuf, StorageError> {
        let (path, mut file) = self.create(file_name)?;
        if let Err(e) = file.write_all(content) {
            drop(file);
            release_blocking(&path);
            return Err(StorageError::WriteFile { path, source: e });
        }
        Ok(path)
    }

    /// Creates a new file exclusively, trying `name`, `name_2`, ... so two
    /// outputs with the same suggested name never overwrite each other.
    pub fn create(&self, file_name: &str) -> Result<(PathBuf, std::fs::File), StorageError> {
        let file_name = sanitize::clean_file_name(file_name);
        let (base, ext) = sanitize::split_extension(&file_name);

        for counter in 1..=1000 {
            let try_filename = if counter == 1 {
                file_name.clone()
            } else {
                match ext {
                    Some(ext) => format!("{}_{}.{}", base, counter, ext),
                    None => format!("{}_{}", base, counter),
                }
            };

            let try_path = self.dir.join(&try_filename);

            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&try_path)
            {
                Ok(file) => return Ok((try_path, file)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(StorageError::WriteFile {
                        path: try_path,
                        source: e,
                    });
                }
            }
        }

        Err(StorageError::FileExists(self.dir.join(file_name)))
    }
}
