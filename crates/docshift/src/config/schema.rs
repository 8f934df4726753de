use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const CONFIG_VERSION: &str = "1.0";

/// 50 MiB, the per-file upload ceiling.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Upper bound on files per batch request.
pub const DEFAULT_MAX_BATCH_FILES: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub version: String,
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,
    #[serde(default = "default_scratch_directory")]
    pub scratch_directory: PathBuf,
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: u64,
    #[serde(default = "default_max_batch_files")]
    pub max_batch_files: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub cors: CorsConfig,
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 5000))
}

/// `<cache dir>/docshift/uploads`, or the system temp dir when no cache dir exists.
fn default_scratch_directory() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("docshift")
        .join("uploads")
}

fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}

fn default_max_batch_files() -> usize {
    DEFAULT_MAX_BATCH_FILES
}

fn default_concurrency() -> usize {
    num_cpus::get()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION.to_string(),
            bind_address: default_bind_address(),
            scratch_directory: default_scratch_directory(),
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE,
            max_batch_files: DEFAULT_MAX_BATCH_FILES,
            concurrency: default_concurrency(),
            cleanup: CleanupConfig::default(),
            logging: LoggingConfig::default(),
            cors: CorsConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Request body ceiling: every file at its maximum plus room for the
    /// multipart framing and scalar option fields.
    pub fn body_limit(&self) -> usize {
        let files = self.max_file_size_bytes.saturating_mul(self.max_batch_files as u64);
        usize::try_from(files.saturating_add(1024 * 1024)).unwrap_or(usize::MAX)
    }
}

/// Backstop sweep of the scratch directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_retention_secs() -> u64 {
    60 * 60
}

fn default_interval_secs() -> u64 {
    30 * 60
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
            interval_secs: default_interval_secs(),
        }
    }
}

impl CleanupConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Allowed origins; empty allows any origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}
