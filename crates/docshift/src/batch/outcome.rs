use std::path::Path;

use serde::Serialize;
use thiserror::Error;

use crate::error::TransformError;
use crate::store::UploadedFile;
use crate::transform::TransformOutput;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl OutcomeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OutcomeStatus::Completed | OutcomeStatus::Error)
    }
}

/// Why a file failed. Validation failures are the client's fault; the rest
/// are codec or runtime failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Validation,
    Transform,
    Panic,
}

impl From<&TransformError> for FailureKind {
    fn from(e: &TransformError) -> Self {
        if e.is_validation() {
            FailureKind::Validation
        } else {
            FailureKind::Transform
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Illegal outcome transition from {from:?} to {to:?}")]
pub struct InvalidTransition {
    pub from: OutcomeStatus,
    pub to: OutcomeStatus,
}

/// Per-file record of one batch run.
#[derive(Debug, Clone)]
pub struct FileOutcome {
    pub index: usize,
    pub source: UploadedFile,
    status: OutcomeStatus,
    output: Option<TransformOutput>,
    error_message: Option<String>,
    error_kind: Option<FailureKind>,
}

impl FileOutcome {
    pub fn new(index: usize, source: UploadedFile) -> Self {
        Self {
            index,
            source,
            status: OutcomeStatus::Pending,
            output: None,
            error_message: None,
            error_kind: None,
        }
    }

    pub fn status(&self) -> OutcomeStatus {
        self.status
    }

    pub fn output(&self) -> Option<&TransformOutput> {
        self.output.as_ref()
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.output.as_ref().map(|o| o.path.as_path())
    }

    pub fn output_name(&self) -> Option<&str> {
        self.output.as_ref().map(|o| o.file_name.as_str())
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn error_kind(&self) -> Option<FailureKind> {
        self.error_kind
    }

    pub fn mark_processing(&mut self) -> Result<(), InvalidTransition> {
        self.transition(OutcomeStatus::Pending, OutcomeStatus::Processing)
    }

    pub fn complete(&mut self, output: TransformOutput) -> Result<(), InvalidTransition> {
        self.transition(OutcomeStatus::Processing, OutcomeStatus::Completed)?;
        self.output = Some(output);
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>, kind: FailureKind) -> Result<(), InvalidTransition> {
        self.transition(OutcomeStatus::Processing, OutcomeStatus::Error)?;
        self.error_message = Some(message.into());
        self.error_kind = Some(kind);
        Ok(())
    }

    fn transition(&mut self, from: OutcomeStatus, to: OutcomeStatus) -> Result<(), InvalidTransition> {
        if self.status != from {
            return Err(InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// The failure record for this file, if it failed.
    pub fn failure(&self) -> Option<FileFailure> {
        if self.status != OutcomeStatus::Error {
            return None;
        }
        Some(FileFailure {
            filename: self.source.original_name.clone(),
            error: self.error_message.clone().unwrap_or_default(),
            validation: self.error_kind == Some(FailureKind::Validation),
        })
    }
}

/// What the client is told about one failed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    pub filename: String,
    pub error: String,
    #[serde(skip)]
    pub validation: bool,
}

/// All outcomes of a batch, in input order.
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub batch_id: String,
    pub outcomes: Vec<FileOutcome>,
}

impl BatchResult {
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn completed(&self) -> impl Iterator<Item = &FileOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.status() == OutcomeStatus::Completed)
    }

    pub fn succeeded_count(&self) -> usize {
        self.completed().count()
    }

    pub fn failed_count(&self) -> usize {
        self.total() - self.succeeded_count()
    }

    pub fn failures(&self) -> Vec<FileFailure> {
        self.outcomes.iter().filter_map(FileOutcome::failure).collect()
    }

    pub fn statuses(&self) -> Vec<OutcomeStatus> {
        self.outcomes.iter().map(FileOutcome::status).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use std::path::PathBuf;

    fn upload(name: &str) -> UploadedFile {
        UploadedFile {
            id: "id".to_string(),
            original_name: name.to_string(),
            mime_type: "image/png".to_string(),
            size_bytes: 1,
            storage_path: PathBuf::from("/tmp").join(name),
        }
    }

    fn output(name: &str) -> TransformOutput {
        TransformOutput {
            path: PathBuf::from("/tmp/out").join(name),
            file_name: name.to_string(),
            mime_type: "image/jpeg".to_string(),
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut outcome = FileOutcome::new(0, upload("a.png"));
        assert_eq!(outcome.status(), OutcomeStatus::Pending);

        outcome.mark_processing().unwrap();
        outcome.complete(output("compressed-a.jpg")).unwrap();

        assert_eq!(outcome.status(), OutcomeStatus::Completed);
        assert_eq!(outcome.output_name(), Some("compressed-a.jpg"));
        assert!(outcome.failure().is_none());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut outcome = FileOutcome::new(0, upload("a.png"));
        outcome.mark_processing().unwrap();
        outcome.fail("boom", FailureKind::Transform).unwrap();

        let err = outcome.complete(output("x.jpg")).unwrap_err();
        assert_eq!(err.from, OutcomeStatus::Error);
        assert_eq!(err.to, OutcomeStatus::Completed);
        assert!(outcome.mark_processing().is_err());
        assert!(outcome.fail("again", FailureKind::Panic).is_err());
        assert_eq!(outcome.error_message(), Some("boom"));
        assert!(outcome.output().is_none());
    }

    #[test]
    fn test_cannot_complete_without_processing() {
        let mut outcome = FileOutcome::new(3, upload("a.png"));
        assert!(outcome.complete(output("x.jpg")).is_err());
        assert_eq!(outcome.status(), OutcomeStatus::Pending);
    }

    #[test]
    fn test_failure_kind_from_transform_error() {
        let validation = TransformError::from(ValidationError::new("pageRange", "reversed"));
        assert_eq!(FailureKind::from(&validation), FailureKind::Validation);
        let codec = TransformError::Pdf("bad xref".to_string());
        assert_eq!(FailureKind::from(&codec), FailureKind::Transform);
    }

    #[test]
    fn test_batch_result_summary() {
        let mut ok = FileOutcome::new(0, upload("a.png"));
        ok.mark_processing().unwrap();
        ok.complete(output("a.jpg")).unwrap();

        let mut bad = FileOutcome::new(1, upload("b.png"));
        bad.mark_processing().unwrap();
        bad.fail("Invalid quality", FailureKind::Validation).unwrap();

        let result = BatchResult {
            batch_id: "batch".to_string(),
            outcomes: vec![ok, bad],
        };

        assert_eq!(result.total(), 2);
        assert_eq!(result.succeeded_count(), 1);
        assert_eq!(result.failed_count(), 1);
        assert_eq!(
            result.failures(),
            vec![FileFailure {
                filename: "b.png".to_string(),
                error: "Invalid quality".to_string(),
                validation: true,
            }]
        );
        assert_eq!(
            serde_json::to_value(&result.failures()[0]).unwrap(),
            serde_json::json!({ "filename": "b.png", "error": "Invalid quality" })
        );
    }
}
