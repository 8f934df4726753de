//! HTTP surface: router, upload gate, handlers and download responses.

/// Problem responses and the error-to-status mapping.
pub mod errors;
/// Conversion endpoints.
pub mod handlers;
/// Liveness endpoint.
pub mod health;
/// Multipart upload gate.
pub mod multipart;
/// Streaming download responses.
pub mod response;
/// Router construction and server host.
pub mod router;

use std::sync::Arc;

use crate::batch::BatchRunner;
use crate::config::ServerConfig;
use crate::store::ScratchStore;

pub use errors::ApiError;
pub use router::{build_router, serve};

/// Shared, immutable state handed to every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub store: ScratchStore,
    pub runner: BatchRunner,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let store = ScratchStore::new(&config.scratch_directory, config.max_file_size_bytes);
        let runner = BatchRunner::new(config.concurrency);
        Self {
            config: Arc::new(config),
            store,
            runner,
        }
    }
}
