//! Transcript entries and segments.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ModelResult;
use crate::timestamp::validate_span;

/// Speaker label used when diarization could not attribute a segment.
pub const UNKNOWN_SPEAKER: &str = "UNKNOWN";

fn default_speaker() -> String {
    UNKNOWN_SPEAKER.to_string()
}

/// One timestamped unit produced by the transcription collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TranscriptEntry {
    pub text: String,
    pub start: f64,
    pub end: f64,
    #[serde(default = "default_speaker")]
    pub speaker: String,
}

impl TranscriptEntry {
    pub fn new(text: impl Into<String>, start: f64, end: f64, speaker: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            start,
            end,
            speaker: speaker.into(),
        }
    }
}

/// Atomic timestamped unit owned by exactly one sentence.
///
/// Fields are private so a segment cannot be mutated after the
/// transcription stage creates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Segment {
    start: f64,
    end: f64,
    text: String,
    #[serde(default = "default_speaker")]
    speaker: String,
}

impl Segment {
    /// Create a segment, validating `start <= end`.
    pub fn new(start: f64, end: f64, text: impl Into<String>, speaker: impl Into<String>) -> ModelResult<Self> {
        validate_span(start, end)?;
        Ok(Self {
            start,
            end,
            text: text.into(),
            speaker: speaker.into(),
        })
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn end(&self) -> f64 {
        self.end
    }

    pub fn timestamp(&self) -> (f64, f64) {
        (self.start, self.end)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn speaker(&self) -> &str {
        &self.speaker
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn contains(&self, ts: f64) -> bool {
        self.start <= ts && ts <= self.end
    }
}

impl TryFrom<&TranscriptEntry> for Segment {
    type Error = crate::error::ModelError;

    fn try_from(entry: &TranscriptEntry) -> Result<Self, Self::Error> {
        Segment::new(entry.start, entry.end, entry.text.trim(), entry.speaker.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;

    #[test]
    fn test_segment_rejects_reversed_span() {
        let err = Segment::new(3.0, 1.0, "x", "A").unwrap_err();
        assert!(matches!(err, ModelError::InvalidSpan { .. }));
    }

    #[test]
    fn test_segment_from_entry_trims_text() {
        let entry = TranscriptEntry::new("  Hello. ", 0.0, 1.0, "A");
        let segment = Segment::try_from(&entry).unwrap();
        assert_eq!(segment.text(), "Hello.");
        assert_eq!(segment.timestamp(), (0.0, 1.0));
        assert!(segment.contains(0.5));
        assert!(!segment.contains(1.5));
    }

    #[test]
    fn test_entry_speaker_defaults_to_unknown() {
        let entry: TranscriptEntry =
            serde_json::from_str(r#"{"text":"hi","start":0.0,"end":1.0}"#).unwrap();
        assert_eq!(entry.speaker, UNKNOWN_SPEAKER);
    }
}
