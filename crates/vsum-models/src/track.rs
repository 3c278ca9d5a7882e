//! Annotation tracks attached to sentences.
//!
//! A track is a named channel of per-sentence data (transcript text,
//! keyframe salience, ...). Every track exposes the same core capability set
//! through [`Track`]; optional capabilities such as embeddings return
//! [`ModelError::UnsupportedTrackOperation`] instead of silently doing nothing.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ModelError, ModelResult};
use crate::segment::UNKNOWN_SPEAKER;

/// Registered name of the transcript text track.
pub const TEXT_TRACK: &str = "text";

/// Registered name of the keyframe salience track.
pub const KEYFRAME_TRACK: &str = "keyframe";

/// Operations that can be dispatched across a document's tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackOperation {
    GetData,
    SetData,
    GetScore,
    SetScore,
    GetEmbedding,
    SetEmbedding,
    Render,
}

impl TrackOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackOperation::GetData => "get_data",
            TrackOperation::SetData => "set_data",
            TrackOperation::GetScore => "get_score",
            TrackOperation::SetScore => "set_score",
            TrackOperation::GetEmbedding => "get_embedding",
            TrackOperation::SetEmbedding => "set_embedding",
            TrackOperation::Render => "render",
        }
    }

    /// Whether the operation consumes one operand per sentence.
    pub fn takes_operand(&self) -> bool {
        matches!(
            self,
            TrackOperation::SetData | TrackOperation::SetScore | TrackOperation::SetEmbedding
        )
    }
}

impl fmt::Display for TrackOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability interface shared by every track variant.
pub trait Track: fmt::Display + Send + Sync {
    /// Name this track is registered under.
    fn kind(&self) -> &str;

    /// Serializable snapshot of the track's data.
    fn data(&self) -> Value;

    /// Replace the track's data.
    fn set_data(&mut self, data: Value) -> ModelResult<()>;

    fn score(&self) -> Option<f64>;

    fn set_score(&mut self, score: f64);

    /// Embedding vector, for tracks that carry one.
    fn embedding(&self) -> Option<&[f32]> {
        None
    }

    fn set_embedding(&mut self, _embedding: Vec<f32>) -> ModelResult<()> {
        Err(ModelError::unsupported(self.kind(), "set_embedding"))
    }

    /// Plain text carried by the track, if any.
    fn text(&self) -> Option<&str> {
        None
    }

    /// Whether the track implements `operation`.
    fn supports(&self, operation: TrackOperation) -> bool {
        match operation {
            TrackOperation::GetEmbedding | TrackOperation::SetEmbedding => false,
            _ => true,
        }
    }

    fn clone_box(&self) -> Box<dyn Track>;

    fn as_any(&self) -> &dyn std::any::Any;
}

impl Clone for Box<dyn Track> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

impl fmt::Debug for dyn Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Track")
            .field("kind", &self.kind())
            .field("data", &self.data())
            .finish()
    }
}

/// Apply `operation` to a single track.
pub fn dispatch(track: &mut dyn Track, operation: TrackOperation, operand: Option<Value>) -> ModelResult<Value> {
    if !track.supports(operation) {
        return Err(ModelError::unsupported(track.kind(), operation.as_str()));
    }

    let operand = match (operation.takes_operand(), operand) {
        (true, Some(value)) => Some(value),
        (true, None) => {
            return Err(ModelError::MissingOperand {
                operation: operation.as_str(),
            })
        }
        (false, _) => None,
    };

    match operation {
        TrackOperation::GetData => Ok(track.data()),
        TrackOperation::SetData => {
            track.set_data(operand.unwrap_or(Value::Null))?;
            Ok(Value::Null)
        }
        TrackOperation::GetScore => Ok(track.score().map(Value::from).unwrap_or(Value::Null)),
        TrackOperation::SetScore => {
            let score = operand
                .as_ref()
                .and_then(Value::as_f64)
                .ok_or_else(|| ModelError::invalid_track_data(track.kind(), "score must be a number"))?;
            track.set_score(score);
            Ok(Value::Null)
        }
        TrackOperation::GetEmbedding => Ok(track
            .embedding()
            .map(|e| Value::from(e.to_vec()))
            .unwrap_or(Value::Null)),
        TrackOperation::SetEmbedding => {
            let embedding: Vec<f32> = serde_json::from_value(operand.unwrap_or(Value::Null))
                .map_err(|e| ModelError::invalid_track_data(track.kind(), e.to_string()))?;
            track.set_embedding(embedding)?;
            Ok(Value::Null)
        }
        TrackOperation::Render => Ok(Value::String(track.to_string())),
    }
}

/// Parse track data, treating `null` as an empty object.
fn parse_data<T: for<'de> Deserialize<'de> + Default>(kind: &str, data: Value) -> ModelResult<T> {
    if data.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(data).map_err(|e| ModelError::invalid_track_data(kind, e.to_string()))
}

fn default_speaker() -> String {
    UNKNOWN_SPEAKER.to_string()
}

/// Transcript text with speaker label, embedding and similarity score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextTrack {
    #[serde(default)]
    pub text: String,
    #[serde(default = "default_speaker")]
    pub speaker: String,
    #[serde(default)]
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub score: Option<f64>,
}

impl Default for TextTrack {
    fn default() -> Self {
        Self {
            text: String::new(),
            speaker: default_speaker(),
            embedding: Vec::new(),
            score: None,
        }
    }
}

impl TextTrack {
    pub fn new(text: impl Into<String>, speaker: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            speaker: speaker.into(),
            ..Default::default()
        }
    }

    pub fn from_value(data: Value) -> ModelResult<Self> {
        parse_data(TEXT_TRACK, data)
    }
}

impl fmt::Display for TextTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.speaker, self.text)
    }
}

impl Track for TextTrack {
    fn kind(&self) -> &str {
        TEXT_TRACK
    }

    fn data(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    fn set_data(&mut self, data: Value) -> ModelResult<()> {
        *self = Self::from_value(data)?;
        Ok(())
    }

    fn score(&self) -> Option<f64> {
        self.score
    }

    fn set_score(&mut self, score: f64) {
        self.score = Some(score);
    }

    fn embedding(&self) -> Option<&[f32]> {
        if self.embedding.is_empty() {
            None
        } else {
            Some(&self.embedding)
        }
    }

    fn set_embedding(&mut self, embedding: Vec<f32>) -> ModelResult<()> {
        self.embedding = embedding;
        Ok(())
    }

    fn text(&self) -> Option<&str> {
        Some(&self.text)
    }

    fn supports(&self, _operation: TrackOperation) -> bool {
        true
    }

    fn clone_box(&self) -> Box<dyn Track> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Representative keyframes for a sentence and their salience.
///
/// `score` holds the raw salience count reported by the keyframe
/// collaborator; `normalized_score` is written by the filtering engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyframeTrack {
    #[serde(default)]
    pub frame_count: u32,
    #[serde(default)]
    pub frames: Vec<f64>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub normalized_score: Option<f64>,
}

impl KeyframeTrack {
    pub fn from_value(data: Value) -> ModelResult<Self> {
        parse_data(KEYFRAME_TRACK, data)
    }
}

impl fmt::Display for KeyframeTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frames: {}", self.frame_count)
    }
}

impl Track for KeyframeTrack {
    fn kind(&self) -> &str {
        KEYFRAME_TRACK
    }

    fn data(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    fn set_data(&mut self, data: Value) -> ModelResult<()> {
        *self = Self::from_value(data)?;
        Ok(())
    }

    fn score(&self) -> Option<f64> {
        self.score
    }

    fn set_score(&mut self, score: f64) {
        self.score = Some(score);
        self.frame_count = score.max(0.0).round() as u32;
    }

    fn clone_box(&self) -> Box<dyn Track> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Schemaless track for ad-hoc modalities.
///
/// Holds arbitrary JSON; the score lives under the `score` field.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonTrack {
    kind: String,
    data: Value,
}

impl JsonTrack {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        let data = if data.is_null() {
            Value::Object(Default::default())
        } else {
            data
        };
        Self {
            kind: kind.into(),
            data,
        }
    }
}

impl fmt::Display for JsonTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.data)
    }
}

impl Track for JsonTrack {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn data(&self) -> Value {
        self.data.clone()
    }

    fn set_data(&mut self, data: Value) -> ModelResult<()> {
        self.data = data;
        Ok(())
    }

    fn score(&self) -> Option<f64> {
        self.data.get("score").and_then(Value::as_f64)
    }

    fn set_score(&mut self, score: f64) {
        match self.data.as_object_mut() {
            Some(map) => {
                map.insert("score".to_string(), Value::from(score));
            }
            None => {
                self.data = serde_json::json!({ "value": self.data.take(), "score": score });
            }
        }
    }

    fn clone_box(&self) -> Box<dyn Track> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_track_display_and_data() {
        let track = TextTrack::new("Hello, world!", "Alice");
        assert_eq!(track.to_string(), "Alice: Hello, world!");
        assert_eq!(track.data()["text"], "Hello, world!");
        assert_eq!(track.score(), None);
    }

    #[test]
    fn test_text_track_set_data_replaces_contents() {
        let mut track = TextTrack::new("Hello", "Alice");
        track
            .set_data(json!({"text": "Goodbye, world!", "speaker": "Bob"}))
            .unwrap();
        assert_eq!(track.text, "Goodbye, world!");
        assert_eq!(track.speaker, "Bob");
        assert!(track.embedding.is_empty());
    }

    #[test]
    fn test_keyframe_track_rejects_embedding() {
        let mut track = KeyframeTrack::default();
        let err = dispatch(&mut track, TrackOperation::SetEmbedding, Some(json!([0.1]))).unwrap_err();
        assert!(matches!(err, ModelError::UnsupportedTrackOperation { .. }));
        assert!(matches!(
            track.set_embedding(vec![1.0]),
            Err(ModelError::UnsupportedTrackOperation { .. })
        ));
    }

    #[test]
    fn test_keyframe_track_score_sets_frame_count() {
        let mut track = KeyframeTrack::default();
        dispatch(&mut track, TrackOperation::SetScore, Some(json!(4))).unwrap();
        assert_eq!(track.score(), Some(4.0));
        assert_eq!(track.to_string(), "Frames: 4");
    }

    #[test]
    fn test_dispatch_requires_operand_for_setters() {
        let mut track = TextTrack::default();
        let err = dispatch(&mut track, TrackOperation::SetScore, None).unwrap_err();
        assert!(matches!(err, ModelError::MissingOperand { .. }));

        let err = dispatch(&mut track, TrackOperation::SetScore, Some(json!("high"))).unwrap_err();
        assert!(matches!(err, ModelError::InvalidTrackData { .. }));
    }

    #[test]
    fn test_dispatch_embedding_roundtrip_on_text_track() {
        let mut track = TextTrack::default();
        dispatch(&mut track, TrackOperation::SetEmbedding, Some(json!([0.5, 0.25]))).unwrap();
        let value = dispatch(&mut track, TrackOperation::GetEmbedding, None).unwrap();
        assert_eq!(value, json!([0.5, 0.25]));
    }

    #[test]
    fn test_json_track_score_lives_in_data() {
        let mut track = JsonTrack::new("audio", json!({"waveform": [0.01, 0.02]}));
        assert_eq!(track.score(), None);
        track.set_score(0.7);
        assert_eq!(track.score(), Some(0.7));
        assert_eq!(track.data()["waveform"], json!([0.01, 0.02]));
    }

    #[test]
    fn test_null_data_yields_defaults() {
        let track = TextTrack::from_value(Value::Null).unwrap();
        assert_eq!(track.speaker, UNKNOWN_SPEAKER);
        assert!(TextTrack::from_value(json!({"text": 5})).is_err());
    }
}
