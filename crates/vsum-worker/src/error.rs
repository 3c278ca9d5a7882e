//! Worker error types.
//!
//! Item-scoped failures (collaborator errors, invalid stage output, document
//! contract violations) are recorded on the item and the batch continues.
//! Configuration errors abort the run before any item is touched.

use thiserror::Error;

use vsum_models::{ModelError, Stage};

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("{stage} collaborator failed: {message}")]
    Collaborator { stage: Stage, message: String },

    #[error("{stage} produced invalid output: {message}")]
    Validation { stage: Stage, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Evaluation error: {0}")]
    Evaluation(String),

    #[error("Document error: {0}")]
    Model(#[from] ModelError),

    #[error("Storage error: {0}")]
    Storage(#[from] vsum_storage::StorageError),

    #[error("Media error: {0}")]
    Media(#[from] vsum_media::MediaError),

    #[error("ML service error: {0}")]
    MlClient(#[from] vsum_ml_client::MlClientError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn collaborator(stage: Stage, msg: impl Into<String>) -> Self {
        Self::Collaborator {
            stage,
            message: msg.into(),
        }
    }

    pub fn validation(stage: Stage, msg: impl Into<String>) -> Self {
        Self::Validation {
            stage,
            message: msg.into(),
        }
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn evaluation(msg: impl Into<String>) -> Self {
        Self::Evaluation(msg.into())
    }

    /// Errors that will recur for every item and must stop the run.
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(self, WorkerError::Config(_))
    }

    /// Errors recovered at item granularity.
    pub fn is_item_scoped(&self) -> bool {
        !self.is_fatal_for_run()
    }

    /// Attribute an error raised while running `stage` for one item.
    ///
    /// Malformed input from the document model becomes a validation failure;
    /// anything raised by a collaborator becomes a collaborator failure whose
    /// message keeps the source error's own prefix (`IO error: ...`).
    pub fn for_stage(self, stage: Stage) -> Self {
        match self {
            e @ (WorkerError::Collaborator { .. } | WorkerError::Validation { .. } | WorkerError::Config(_)) => e,
            WorkerError::Model(e) if e.is_input_error() => Self::validation(stage, e.to_string()),
            WorkerError::Model(e) => WorkerError::Model(e),
            other => Self::collaborator(stage, other.to_string()),
        }
    }
}
