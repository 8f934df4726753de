use std::sync::Arc;

use futures_util::{stream, StreamExt};
use tracing::{warn, Instrument, Span};

use crate::batch::outcome::{BatchResult, FailureKind, FileOutcome};
use crate::batch::progress::{ProgressEvent, ProgressReporter};
use crate::error::BatchError;
use crate::store::{BatchScope, OutputDir, UploadedFile};
use crate::transform::{Transform, TransformInput};

/// Applies one transform to every file of a batch.
///
/// Each file runs on the blocking pool. At most `concurrency` files are in
/// flight, and outcomes come back in input order whatever order they finish in.
#[derive(Debug, Clone)]
pub struct BatchRunner {
    concurrency: usize,
}

impl Default for BatchRunner {
    fn default() -> Self {
        Self::new(num_cpus::get())
    }
}

impl BatchRunner {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub async fn run(
        &self,
        transform: Arc<dyn Transform>,
        files: Vec<UploadedFile>,
        scope: &BatchScope,
        progress: &dyn ProgressReporter,
    ) -> Result<BatchResult, BatchError> {
        if files.is_empty() {
            return Err(BatchError::Empty);
        }

        let span = tracing::info_span!(
            "batch.run",
            batch_id = %scope.id(),
            transform = %transform.kind(),
            files = files.len(),
        );

        async move {
            let outputs = scope.outputs();
            let outcomes: Vec<FileOutcome> = stream::iter(files.into_iter().enumerate())
                .map(|(index, file)| {
                    process_file(
                        FileOutcome::new(index, file),
                        Arc::clone(&transform),
                        outputs.clone(),
                        progress,
                    )
                })
                .buffered(self.concurrency)
                .collect()
                .await;

            let result = BatchResult {
                batch_id: scope.id().to_string(),
                outcomes,
            };
            progress.report(ProgressEvent::Finished {
                succeeded: result.succeeded_count(),
                failed: result.failed_count(),
            });

            if result.succeeded_count() == 0 {
                return Err(BatchError::AllFailed {
                    failures: result.failures(),
                });
            }
            Ok(result)
        }
        .instrument(span)
        .await
    }
}

async fn process_file(
    mut outcome: FileOutcome,
    transform: Arc<dyn Transform>,
    outputs: OutputDir,
    progress: &dyn ProgressReporter,
) -> FileOutcome {
    let file_name = outcome.source.original_name.clone();

    if let Err(e) = outcome.mark_processing() {
        warn!("{}", e);
        return outcome;
    }
    progress.report(ProgressEvent::Started {
        index: outcome.index,
        file_name: file_name.clone(),
    });

    let input = TransformInput::from(&outcome.source);
    let span = Span::current();
    let joined = tokio::task::spawn_blocking(move || {
        span.in_scope(|| transform.apply(&input, &outputs))
    })
    .await;

    let transitioned = match joined {
        Ok(Ok(output)) => {
            let output_name = output.file_name.clone();
            outcome.complete(output).map(|_| ProgressEvent::Completed {
                index: outcome.index,
                file_name,
                output_name,
            })
        }
        Ok(Err(e)) => {
            let message = e.to_string();
            outcome
                .fail(message.clone(), FailureKind::from(&e))
                .map(|_| ProgressEvent::Failed {
                    index: outcome.index,
                    file_name,
                    error: message,
                })
        }
        Err(join_error) => {
            let message = if join_error.is_panic() {
                "Transform panicked".to_string()
            } else {
                "Transform was cancelled".to_string()
            };
            outcome
                .fail(message.clone(), FailureKind::Panic)
                .map(|_| ProgressEvent::Failed {
                    index: outcome.index,
                    file_name,
                    error: message,
                })
        }
    };

    match transitioned {
        Ok(event) => progress.report(event),
        Err(e) => warn!("{}", e),
    }
    outcome
}
