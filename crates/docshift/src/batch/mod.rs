pub mod outcome;
pub mod progress;
pub mod runner;

pub use outcome::{
    BatchResult, FailureKind, FileFailure, FileOutcome, InvalidTransition, OutcomeStatus,
};
pub use progress::{NoopProgress, ProgressEvent, ProgressReporter, TracingProgress};
pub use runner::BatchRunner;
