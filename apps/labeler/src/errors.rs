use std::path::PathBuf;

use thiserror::Error;

use crate::llm_client::BackendError;

/// Labeling-level error type.
///
/// `Input` and `Output` abort the run. Every other variant is raised inside a
/// single task and stays there; the record is logged, counted and left out of
/// the output sink.
#[derive(Debug, Error)]
pub enum LabelError {
    #[error("Input file {} is missing or unreadable: {source}", path.display())]
    Input {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Output sink error: {0}")]
    Output(#[from] std::io::Error),

    #[error("Record on line {line} is invalid: {reason}")]
    Record { line: usize, reason: String },

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Labeling task panicked: {0}")]
    TaskPanicked(String),
}

impl LabelError {
    /// Whether the error ends the whole run rather than a single record.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LabelError::Input { .. } | LabelError::Output(_))
    }
}
