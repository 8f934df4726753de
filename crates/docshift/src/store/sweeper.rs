//! Periodic removal of stale scratch entries.
//!
//! Batch scopes clean up after themselves; the sweeper catches whatever a
//! crash or a leaked scope left behind.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use walkdir::WalkDir;

use crate::sanitize::redact_path;

/// Totals of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: usize,
    pub failed: usize,
}

pub struct Sweeper {
    root: PathBuf,
    interval: Duration,
    retention: Duration,
    shutdown: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl Sweeper {
    pub fn new<P: AsRef<Path>>(root: P, interval: Duration, retention: Duration) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            interval,
            retention,
            shutdown: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
        }
    }

    /// Starts the sweep loop on the current tokio runtime.
    pub fn start(&self) -> JoinHandle<()> {
        let root = self.root.clone();
        let interval = self.interval;
        let retention = self.retention;
        let shutdown = Arc::clone(&self.shutdown);
        let wake = Arc::clone(&self.wake);

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(interval);
            interval_timer.tick().await; // skip immediate first tick

            loop {
                if shutdown.load(Ordering::Acquire) {
                    break;
                }

                tokio::select! {
                    _ = interval_timer.tick() => {},
                    _ = wake.notified() => {},
                }

                if shutdown.load(Ordering::Acquire) {
                    break;
                }

                let sweep_root = root.clone();
                match tokio::task::spawn_blocking(move || sweep_once(&sweep_root, retention)).await {
                    Ok(report) if report.removed > 0 || report.failed > 0 => {
                        log::info!(
                            "Scratch sweep: {} removed, {} failed",
                            report.removed,
                            report.failed
                        );
                    }
                    Err(e) => log::error!("Scratch sweep task failed: {}", e),
                    _ => {}
                }
            }

            log::debug!("Scratch sweeper stopped");
        })
    }

    /// Signals the sweep loop to stop and wakes it.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.wake.notify_one();
    }
}

/// Removes every direct child of `root` whose modification time is at least
/// `retention` old. Errors are logged and counted, never returned.
pub fn sweep_once(root: &Path, retention: Duration) -> SweepReport {
    let mut report = SweepReport::default();
    if !root.exists() {
        return report;
    }

    let now = SystemTime::now();

    for entry in WalkDir::new(root).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Failed to read scratch entry: {}", e);
                report.failed += 1;
                continue;
            }
        };

        let modified = match entry.metadata().map(|m| m.modified()) {
            Ok(Ok(modified)) => modified,
            Ok(Err(e)) => {
                log::warn!("No modification time for {}: {}", redact_path(entry.path()), e);
                report.failed += 1;
                continue;
            }
            Err(e) => {
                log::warn!("Failed to stat {}: {}", redact_path(entry.path()), e);
                report.failed += 1;
                continue;
            }
        };

        // Clock skew can put mtime in the future; treat that as fresh.
        let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
        if age < retention {
            continue;
        }

        let removed = if entry.file_type().is_dir() {
            std::fs::remove_dir_all(entry.path())
        } else {
            std::fs::remove_file(entry.path())
        };

        match removed {
            Ok(()) => {
                log::info!("Deleted old scratch entry: {}", redact_path(entry.path()));
                report.removed += 1;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                log::warn!("Failed to delete {}: {}", redact_path(entry.path()), e);
                report.failed += 1;
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HOUR: Duration = Duration::from_secs(3600);

    fn backdate(path: &Path, by: Duration) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - by).unwrap();
    }

    #[test]
    fn test_sweep_removes_only_stale_entries() {
        let temp = TempDir::new().unwrap();
        let stale = temp.path().join("stale.pdf");
        let fresh = temp.path().join("fresh.pdf");
        std::fs::write(&stale, b"old").unwrap();
        std::fs::write(&fresh, b"new").unwrap();
        backdate(&stale, 2 * HOUR);

        let report = sweep_once(temp.path(), HOUR);

        assert_eq!(report, SweepReport { removed: 1, failed: 0 });
        assert!(!stale.exists());
        assert!(fresh.exists());
    }

    #[test]
    fn test_sweep_removes_stale_batch_directories() {
        let temp = TempDir::new().unwrap();
        let batch = temp.path().join("batch-1");
        std::fs::create_dir_all(batch.join("in")).unwrap();
        std::fs::write(batch.join("in").join("a.png"), b"x").unwrap();

        let report = sweep_once(temp.path(), Duration::ZERO);

        assert_eq!(report.removed, 1);
        assert!(!batch.exists());
        assert!(temp.path().exists());
    }

    #[test]
    fn test_sweep_missing_root_is_noop() {
        let temp = TempDir::new().unwrap();
        let report = sweep_once(&temp.path().join("missing"), HOUR);
        assert_eq!(report, SweepReport::default());
    }

    #[tokio::test]
    async fn test_sweeper_shutdown() {
        let temp = TempDir::new().unwrap();
        let sweeper = Sweeper::new(temp.path(), Duration::from_millis(20), HOUR);

        let handle = sweeper.start();
        tokio::time::sleep(Duration::from_millis(60)).await;
        sweeper.stop();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("sweeper did not stop")
            .expect("sweeper task panicked");
    }
}
