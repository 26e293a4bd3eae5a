//! Failure taxonomy for the pipeline core.
//!
//! Only two classes of failure are allowed to abort a run: a required input
//! that is missing or unreadable, and the local prediction service failing to
//! come up within its retry budget. Everything else degrades: unrecognized
//! schemas produce empty artifacts, per-row query failures produce unenriched
//! rows, and a corrupted ledger is rebuilt from scratch.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A required input file is missing or unreadable. The one true hard
    /// failure for the enrichment CLIs.
    #[error("input file {path} is missing or unreadable")]
    InputMissing { path: PathBuf },

    /// The local prediction service did not reach readiness within the poll
    /// budget, or exhausted its bounded restart budget.
    #[error("prediction service failed to start: {reason}")]
    ServiceStartup { reason: String },

    /// A stage's producing operation exited with a failure status.
    #[error("stage '{stage}' failed: {reason}")]
    StageFailed { stage: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PipelineError::InputMissing {
            path: PathBuf::from("/tmp/missing.tsv"),
        };
        assert!(err.to_string().contains("missing.tsv"));

        let err = PipelineError::ServiceStartup {
            reason: "poll budget exhausted".to_string(),
        };
        assert!(err.to_string().contains("poll budget"));
    }
}
