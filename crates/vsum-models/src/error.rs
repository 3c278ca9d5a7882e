//! Document model error types.

use thiserror::Error;

/// Result type for document model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Contract violations and malformed input detected by the document model.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("Arity mismatch: expected {expected} values (one per sentence), got {actual}")]
    Arity { expected: usize, actual: usize },

    #[error("Unknown track type: {0}")]
    UnknownTrackType(String),

    #[error("Sentence {sentence} has no '{track}' track")]
    MissingTrack { track: String, sentence: usize },

    #[error("Track '{track}' does not support operation '{operation}'")]
    UnsupportedTrackOperation { track: String, operation: &'static str },

    #[error("Operation '{operation}' requires one operand per sentence")]
    MissingOperand { operation: &'static str },

    #[error("Invalid data for track '{track}': {message}")]
    InvalidTrackData { track: String, message: String },

    #[error("Metadata key '{0}' already exists")]
    MetadataKeyExists(String),

    #[error("Metadata key '{0}' does not exist")]
    MetadataKeyMissing(String),

    #[error("Invalid time span: start {start} is after end {end}")]
    InvalidSpan { start: f64, end: f64 },

    #[error("Non-finite timestamp in span ({start}, {end})")]
    NonFiniteTimestamp { start: f64, end: f64 },

    #[error("Span starting at {start} overlaps previous span ending at {previous_end}")]
    OutOfOrder { start: f64, previous_end: f64 },

    #[error("Transcript is empty")]
    EmptyTranscript,

    #[error("Invalid stage transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}

impl ModelError {
    pub fn invalid_track_data(track: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidTrackData {
            track: track.into(),
            message: message.into(),
        }
    }

    pub fn unsupported(track: impl Into<String>, operation: &'static str) -> Self {
        Self::UnsupportedTrackOperation {
            track: track.into(),
            operation,
        }
    }

    /// Errors caused by malformed collaborator output rather than a broken pipeline.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            ModelError::InvalidSpan { .. }
                | ModelError::NonFiniteTimestamp { .. }
                | ModelError::OutOfOrder { .. }
                | ModelError::EmptyTranscript
                | ModelError::InvalidTrackData { .. }
        )
    }
}
