use tracing::{info, warn};

/// Events emitted by the batch runner while it works through a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Started {
        index: usize,
        file_name: String,
    },
    Completed {
        index: usize,
        file_name: String,
        output_name: String,
    },
    Failed {
        index: usize,
        file_name: String,
        error: String,
    },
    Finished {
        succeeded: usize,
        failed: usize,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Turns progress into structured log events.
pub struct TracingProgress;

impl ProgressReporter for TracingProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { index, file_name } => {
                info!(index, file = %file_name, "Processing file");
            }
            ProgressEvent::Completed {
                index,
                file_name,
                output_name,
            } => {
                info!(index, file = %file_name, output = %output_name, "File completed");
            }
            ProgressEvent::Failed {
                index,
                file_name,
                error,
            } => {
                warn!(index, file = %file_name, error = %error, "File failed");
            }
            ProgressEvent::Finished { succeeded, failed } => {
                info!(succeeded, failed, "Batch finished");
            }
        }
    }
}
