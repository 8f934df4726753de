//! Packaging of batch outputs: a Deflate ZIP of every completed output, or the
//! one output itself when the client asked for individual delivery.

use std::collections::HashSet;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, Instrument};
use zip::write::SimpleFileOptions;

use crate::batch::{BatchResult, FileOutcome};
use crate::error::ArchiveError;
use crate::sanitize;
use crate::store::{release, release_blocking, BatchScope};
use crate::transform::OutputMode;

pub const ZIP_MIME: &str = "application/zip";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub path: PathBuf,
    pub entries: Vec<String>,
    pub size_bytes: u64,
}

/// The artifact streamed back to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deliverable {
    Archive {
        path: PathBuf,
        file_name: String,
        entries: Vec<String>,
    },
    Single {
        path: PathBuf,
        file_name: String,
        mime_type: String,
    },
}

impl Deliverable {
    pub fn path(&self) -> &Path {
        match self {
            Deliverable::Archive { path, .. } | Deliverable::Single { path, .. } => path,
        }
    }

    pub fn file_name(&self) -> &str {
        match self {
            Deliverable::Archive { file_name, .. } | Deliverable::Single { file_name, .. } => file_name,
        }
    }

    pub fn mime_type(&self) -> &str {
        match self {
            Deliverable::Archive { .. } => ZIP_MIME,
            Deliverable::Single { mime_type, .. } => mime_type,
        }
    }
}

struct Entry {
    source: PathBuf,
    name: String,
}

pub struct ArchiveBuilder;

impl ArchiveBuilder {
    /// Streams every completed output into a new ZIP at `dest`. The partial
    /// archive is removed if writing fails.
    pub async fn build_zip<'a, I>(outcomes: I, dest: PathBuf) -> Result<ArchiveSummary, ArchiveError>
    where
        I: IntoIterator<Item = &'a FileOutcome>,
    {
        let completed: Vec<(usize, PathBuf, String)> = outcomes
            .into_iter()
            .filter_map(|o| {
                let output = o.output()?;
                Some((o.index, output.path.clone(), output.file_name.clone()))
            })
            .collect();
        if completed.is_empty() {
            return Err(ArchiveError::NothingToArchive);
        }

        let names = unique_entry_names(
            &completed
                .iter()
                .map(|(index, _, name)| (*index, name.as_str()))
                .collect::<Vec<_>>(),
        );
        let entries: Vec<Entry> = completed
            .into_iter()
            .zip(names)
            .map(|((_, source, _), name)| Entry { source, name })
            .collect();

        let span = tracing::info_span!(
            "archive.build_zip",
            archive = %sanitize::redact_path(&dest),
            entries = entries.len(),
        );
        let blocking_dest = dest.clone();
        let joined = tokio::task::spawn_blocking(move || {
            span.in_scope(|| {
                let result = write_zip(&blocking_dest, &entries);
                if result.is_err() {
                    release_blocking(&blocking_dest);
                }
                result.map(|size_bytes| (entries, size_bytes))
            })
        })
        .await;

        match joined {
            Ok(Ok((entries, size_bytes))) => Ok(ArchiveSummary {
                path: dest,
                entries: entries.into_iter().map(|e| e.name).collect(),
                size_bytes,
            }),
            Ok(Err(e)) => Err(e),
            Err(e) => {
                release(&dest).await;
                Err(ArchiveError::Aborted(e.to_string()))
            }
        }
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ArchiveError {
    let path = path.to_path_buf();
    move |source| ArchiveError::Io { path, source }
}

fn write_zip(dest: &Path, entries: &[Entry]) -> Result<u64, ArchiveError> {
    let file = std::fs::File::create(dest).map_err(io_err(dest))?;
    let mut zip = zip::ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .large_file(true);

    for entry in entries {
        let mut source = std::fs::File::open(&entry.source).map_err(io_err(&entry.source))?;
        zip.start_file(entry.name.as_str(), options)?;
        let copied = std::io::copy(&mut source, &mut zip).map_err(io_err(&entry.source))?;
        debug!(entry = %entry.name, bytes = copied, "Added archive entry");
    }

    let mut writer = zip.finish()?;
    writer.flush().map_err(io_err(dest))?;
    drop(writer);

    let size = std::fs::metadata(dest).map_err(io_err(dest))?.len();
    Ok(size)
}

/// Assigns archive entry names in input order.
///
/// Names compare case-insensitively. The first holder of a name keeps it; a
/// later collision gets `-<position>` (1-based input position) before the
/// extension, and a counter after that if the result is still taken.
pub fn unique_entry_names(names: &[(usize, &str)]) -> Vec<String> {
    let mut taken: HashSet<String> = HashSet::new();
    let mut assigned = Vec::with_capacity(names.len());

    for (index, name) in names {
        let name = sanitize::clean_file_name(name);
        if taken.insert(name.to_lowercase()) {
            assigned.push(name);
            continue;
        }

        let (stem, ext) = sanitize::split_extension(&name);
        let with_suffix = |suffix: String| match ext {
            Some(ext) => format!("{}{}.{}", stem, suffix, ext),
            None => format!("{}{}", stem, suffix),
        };

        let position = index + 1;
        let mut candidate = with_suffix(format!("-{}", position));
        let mut counter = 2;
        while !taken.insert(candidate.to_lowercase()) {
            candidate = with_suffix(format!("-{}-{}", position, counter));
            counter += 1;
        }
        assigned.push(candidate);
    }

    assigned
}

/// Picks the artifact for a finished batch: the single output in individual
/// mode when exactly one file succeeded, a ZIP named `archive_name` otherwise.
pub async fn deliver(
    result: &BatchResult,
    mode: OutputMode,
    scope: &BatchScope,
    archive_name: &str,
) -> Result<Deliverable, ArchiveError> {
    if mode == OutputMode::Individual && result.succeeded_count() == 1 {
        if let Some(output) = result.completed().find_map(FileOutcome::output) {
            return Ok(Deliverable::Single {
                path: output.path.clone(),
                file_name: output.file_name.clone(),
                mime_type: output.mime_type.clone(),
            });
        }
    }

    let dest = scope.artifact_path(archive_name);
    let summary = ArchiveBuilder::build_zip(result.completed(), dest)
        .instrument(tracing::info_span!("archive.deliver", batch_id = %scope.id()))
        .await?;

    Ok(Deliverable::Archive {
        path: summary.path,
        file_name: sanitize::clean_file_name(archive_name),
        entries: summary.entries,
    })
}

/// `<prefix>-<unix millis>.zip`, e.g. `compressed-images-1700000000000.zip`.
pub fn archive_name(prefix: &str) -> String {
    format!("{}-{}.zip", prefix, chrono::Utc::now().timestamp_millis())
}
