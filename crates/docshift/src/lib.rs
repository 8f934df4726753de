pub mod archive;
pub mod batch;
pub mod config;
pub mod error;
pub mod http;
pub mod sanitize;
pub mod store;
pub mod transform;

pub use archive::{ArchiveBuilder, ArchiveSummary, Deliverable};
pub use batch::{BatchResult, BatchRunner, FileOutcome, OutcomeStatus, ProgressReporter};
pub use config::{load_config, load_from_env, ServerConfig};
pub use error::{
    ArchiveError, BatchError, ConfigError, DocshiftError, Result, StorageError, TransformError,
    UploadError, ValidationError,
};
pub use http::{build_router, serve, AppState};
pub use store::{BatchScope, ScratchStore, Sweeper, UploadedFile};
pub use transform::{Transform, TransformInput, TransformKind, TransformOutput};
