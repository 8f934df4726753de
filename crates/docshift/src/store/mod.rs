pub mod scratch;
pub mod sweeper;

pub use scratch::{release, release_blocking, BatchScope, OutputDir, ScratchStore, UploadedFile};
pub use sweeper::{sweep_once, SweepReport, Sweeper};
