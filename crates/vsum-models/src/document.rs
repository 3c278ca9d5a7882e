//! Time-aligned annotation document.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ModelError, ModelResult};
use crate::record::{DocumentRecord, SentenceRecord};
use crate::registry::TrackRegistry;
use crate::segment::Segment;
use crate::sentence::Sentence;
use crate::track::{dispatch, TrackOperation, TEXT_TRACK};

/// Document metadata: unique string keys to JSON values.
pub type Metadata = BTreeMap<String, Value>;

/// Well-known metadata keys.
pub mod keys {
    pub const SUMMARY: &str = "summary";
    pub const FILTERED_SENTENCES: &str = "filtered_sentences";
    pub const ERROR: &str = "error";
    pub const FILTER_STATS: &str = "filter_stats";
    pub const SPLICED_OUTPUT: &str = "spliced_output";
}

/// Aggregate score of one sentence with its span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredSpan {
    pub score: Option<f64>,
    pub timestamp: (f64, f64),
}

/// Ordered, non-overlapping sentences plus metadata.
#[derive(Debug, Clone, Default)]
pub struct Document {
    sentences: Vec<Sentence>,
    metadata: Metadata,
}

impl Document {
    /// Create a document, rejecting unordered or overlapping sentences.
    pub fn new(sentences: Vec<Sentence>, metadata: Metadata) -> ModelResult<Self> {
        for pair in sentences.windows(2) {
            if pair[1].start() < pair[0].end() {
                return Err(ModelError::OutOfOrder {
                    start: pair[1].start(),
                    previous_end: pair[0].end(),
                });
            }
        }
        Ok(Self { sentences, metadata })
    }

    /// Empty but valid document carrying an `error` entry.
    pub fn empty_with_error(message: impl Into<String>) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert(keys::ERROR.to_string(), Value::String(message.into()));
        Self {
            sentences: Vec::new(),
            metadata,
        }
    }

    pub fn sentences(&self) -> &[Sentence] {
        &self.sentences
    }

    pub fn sentences_mut(&mut self) -> &mut [Sentence] {
        &mut self.sentences
    }

    pub fn len(&self) -> usize {
        self.sentences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }

    /// Start of the first sentence.
    pub fn start(&self) -> Option<f64> {
        self.sentences.first().map(Sentence::start)
    }

    /// End of the last sentence.
    pub fn end(&self) -> Option<f64> {
        self.sentences.last().map(Sentence::end)
    }

    // --- metadata -------------------------------------------------------

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Insert a new key; fails if it already exists.
    pub fn add_metadata(&mut self, key: impl Into<String>, value: Value) -> ModelResult<()> {
        let key = key.into();
        if self.metadata.contains_key(&key) {
            return Err(ModelError::MetadataKeyExists(key));
        }
        self.metadata.insert(key, value);
        Ok(())
    }

    /// Overwrite an existing key; fails if it was never added.
    pub fn set_metadata(&mut self, key: &str, value: Value) -> ModelResult<()> {
        match self.metadata.get_mut(key) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(ModelError::MetadataKeyMissing(key.to_string())),
        }
    }

    /// Add the key if absent, otherwise overwrite it.
    pub fn upsert_metadata(&mut self, key: &str, value: Value) {
        self.metadata.insert(key.to_string(), value);
    }

    pub fn get_metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    pub fn has_metadata(&self, key: &str) -> bool {
        self.metadata.contains_key(key)
    }

    pub fn remove_metadata(&mut self, key: &str) -> Option<Value> {
        self.metadata.remove(key)
    }

    /// Error recorded for this document, if any.
    pub fn error(&self) -> Option<&str> {
        self.metadata.get(keys::ERROR).and_then(Value::as_str)
    }

    // --- lookup ---------------------------------------------------------

    /// Sentence covering `ts` (inclusive). On a shared boundary the earlier
    /// sentence wins.
    pub fn find_sentence(&self, ts: f64) -> Option<&Sentence> {
        self.find_sentence_index(ts).map(|i| &self.sentences[i])
    }

    pub fn find_sentence_index(&self, ts: f64) -> Option<usize> {
        let idx = self.sentences.partition_point(|s| s.end() < ts);
        match self.sentences.get(idx) {
            Some(sentence) if sentence.contains(ts) => Some(idx),
            _ => None,
        }
    }

    pub fn find_segment(&self, ts: f64) -> Option<&Segment> {
        self.find_sentence(ts).and_then(|s| s.find_segment(ts))
    }

    // --- track dispatch -------------------------------------------------

    /// Apply `operation` to the `track` track of every sentence, or to every
    /// track when `track` is `None`.
    ///
    /// With `data`, sentence `i` receives `data[i]`; the length must equal
    /// the sentence count. Returns one value per sentence; when dispatching
    /// to all tracks each value is an object keyed by track name.
    pub fn call_track_method(
        &mut self,
        operation: TrackOperation,
        track: Option<&str>,
        data: Option<&[Value]>,
    ) -> ModelResult<Vec<Value>> {
        if let Some(data) = data {
            if data.len() != self.sentences.len() {
                return Err(ModelError::Arity {
                    expected: self.sentences.len(),
                    actual: data.len(),
                });
            }
        }

        let mut results = Vec::with_capacity(self.sentences.len());
        for (idx, sentence) in self.sentences.iter_mut().enumerate() {
            let operand = data.map(|d| d[idx].clone());
            match track {
                Some(name) => {
                    let target = sentence.track_mut(name).ok_or_else(|| ModelError::MissingTrack {
                        track: name.to_string(),
                        sentence: idx,
                    })?;
                    results.push(dispatch(target, operation, operand)?);
                }
                None => {
                    let mut per_track = serde_json::Map::new();
                    for (name, target) in sentence.tracks_mut() {
                        let value = dispatch(&mut **target, operation, operand.clone())?;
                        per_track.insert(name.clone(), value);
                    }
                    results.push(Value::Object(per_track));
                }
            }
        }
        Ok(results)
    }

    /// Write one aggregate score per sentence.
    pub fn set_scores(&mut self, scores: &[f64]) -> ModelResult<()> {
        if scores.len() != self.sentences.len() {
            return Err(ModelError::Arity {
                expected: self.sentences.len(),
                actual: scores.len(),
            });
        }
        for (sentence, score) in self.sentences.iter_mut().zip(scores) {
            sentence.set_score(*score);
        }
        Ok(())
    }

    pub fn aggregate_scores(&self) -> Vec<ScoredSpan> {
        self.sentences
            .iter()
            .map(|s| ScoredSpan {
                score: s.score(),
                timestamp: s.timestamp(),
            })
            .collect()
    }

    /// `"{speaker}: {text}"` per non-placeholder sentence, newline separated.
    pub fn plain_text(&self) -> String {
        self.sentences
            .iter()
            .filter(|s| !s.is_placeholder())
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    // --- persistence ----------------------------------------------------

    pub fn to_record(&self) -> DocumentRecord {
        let sentences = self
            .sentences
            .iter()
            .map(|s| SentenceRecord {
                start: s.start(),
                end: s.end(),
                tracks: s.tracks().map(|(name, t)| (name.to_string(), t.data())).collect(),
                score: s.score(),
                placeholder: s.is_placeholder(),
                segments: s.segments().to_vec(),
            })
            .collect();

        DocumentRecord {
            metadata: self.metadata.clone(),
            sentences,
        }
    }

    /// Rebuild a document from its record.
    ///
    /// Every track named in `requested_tracks` must be registered; sentences
    /// missing one of them get an empty instance. Persisted tracks of an
    /// unregistered type fail with `UnknownTrackType`.
    pub fn from_record(
        record: DocumentRecord,
        registry: &TrackRegistry,
        requested_tracks: &[&str],
    ) -> ModelResult<Self> {
        registry.ensure_registered(requested_tracks.iter().copied())?;

        let mut sentences = Vec::with_capacity(record.sentences.len());
        for sr in record.sentences {
            let mut sentence = Sentence::restore(sr.start, sr.end, sr.segments, sr.score, sr.placeholder)?;
            for (name, data) in sr.tracks {
                let track = registry.create(&name, data)?;
                sentence.insert_track(name, track);
            }
            for name in requested_tracks {
                if !sentence.has_track(name) {
                    sentence.insert_track(*name, registry.create(name, Value::Null)?);
                }
            }
            sentences.push(sentence);
        }

        Self::new(sentences, record.metadata)
    }

    /// Text tracks are always present on documents built by [`build_document`](crate::build_document).
    pub fn has_text_track(&self) -> bool {
        self.sentences.iter().all(|s| s.has_track(TEXT_TRACK))
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, sentence) in self.sentences.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "({}:{}) - {}", sentence.start(), sentence.end(), sentence)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::{KeyframeTrack, TextTrack, KEYFRAME_TRACK};
    use serde_json::json;

    fn sentence(start: f64, end: f64, text: &str, speaker: &str) -> Sentence {
        let segment = Segment::new(start, end, text, speaker).unwrap();
        let mut s = Sentence::new(vec![segment]).unwrap();
        s.insert_track(TEXT_TRACK, Box::new(TextTrack::new(text, speaker)));
        s.insert_track(KEYFRAME_TRACK, Box::new(KeyframeTrack::default()));
        s
    }

    fn doc() -> Document {
        Document::new(
            vec![
                sentence(0.0, 1.0, "Hello.", "A"),
                sentence(1.0, 2.0, "World.", "B"),
            ],
            Metadata::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_metadata_write_once() {
        let mut d = doc();
        d.add_metadata("summary", json!("first")).unwrap();
        assert_eq!(
            d.add_metadata("summary", json!("again")).unwrap_err(),
            ModelError::MetadataKeyExists("summary".to_string())
        );
        assert_eq!(
            d.set_metadata("never", json!(1)).unwrap_err(),
            ModelError::MetadataKeyMissing("never".to_string())
        );
        d.set_metadata("summary", json!("second")).unwrap();
        assert_eq!(d.get_metadata("summary"), Some(&json!("second")));
    }

    #[test]
    fn test_new_rejects_overlap() {
        let err = Document::new(
            vec![sentence(0.0, 2.0, "a", "A"), sentence(1.0, 3.0, "b", "A")],
            Metadata::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::OutOfOrder { .. }));
    }

    #[test]
    fn test_find_sentence_inclusive() {
        let d = doc();
        assert_eq!(d.find_sentence(0.0).map(Sentence::start), Some(0.0));
        assert_eq!(d.find_sentence(1.0).map(Sentence::start), Some(0.0));
        assert_eq!(d.find_sentence(1.5).map(Sentence::start), Some(1.0));
        assert_eq!(d.find_sentence(2.0).map(Sentence::start), Some(1.0));
        assert!(d.find_sentence(2.5).is_none());
        assert_eq!(d.find_segment(1.5).map(Segment::text), Some("World."));
    }

    #[test]
    fn test_call_track_method_arity() {
        let mut d = doc();
        let err = d
            .call_track_method(TrackOperation::SetScore, Some(TEXT_TRACK), Some(&[json!(0.1)]))
            .unwrap_err();
        assert_eq!(err, ModelError::Arity { expected: 2, actual: 1 });

        d.call_track_method(TrackOperation::SetScore, Some(TEXT_TRACK), Some(&[json!(0.1), json!(0.9)]))
            .unwrap();
        let scores = d
            .call_track_method(TrackOperation::GetScore, Some(TEXT_TRACK), None)
            .unwrap();
        assert_eq!(scores, vec![json!(0.1), json!(0.9)]);
    }

    #[test]
    fn test_call_track_method_all_tracks() {
        let mut d = doc();
        let rendered = d.call_track_method(TrackOperation::Render, None, None).unwrap();
        assert_eq!(rendered[0], json!({"keyframe": "Frames: 0", "text": "A: Hello."}));

        let err = d
            .call_track_method(TrackOperation::SetEmbedding, None, Some(&[json!([1.0]), json!([2.0])]))
            .unwrap_err();
        assert!(matches!(err, ModelError::UnsupportedTrackOperation { .. }));
    }

    #[test]
    fn test_call_track_method_missing_track() {
        let mut d = doc();
        let err = d
            .call_track_method(TrackOperation::GetData, Some("audio"), None)
            .unwrap_err();
        assert!(matches!(err, ModelError::MissingTrack { sentence: 0, .. }));
    }

    #[test]
    fn test_scores_and_rendering() {
        let mut d = doc();
        assert!(d.set_scores(&[1.0]).is_err());
        d.set_scores(&[0.25, 0.75]).unwrap();
        let spans = d.aggregate_scores();
        assert_eq!(spans[1], ScoredSpan { score: Some(0.75), timestamp: (1.0, 2.0) });

        assert_eq!(d.plain_text(), "A: Hello.\nB: World.");
        assert_eq!(d.to_string(), "(0:1) - A: Hello.\n(1:2) - B: World.");
    }

    #[test]
    fn test_record_roundtrip_preserves_state() {
        let mut d = doc();
        d.add_metadata(keys::SUMMARY, json!("greeting")).unwrap();
        d.set_scores(&[0.1, 0.2]).unwrap();

        let json = serde_json::to_string(&d.to_record()).unwrap();
        let record: DocumentRecord = serde_json::from_str(&json).unwrap();
        let restored = Document::from_record(record, &TrackRegistry::with_defaults(), &[TEXT_TRACK]).unwrap();

        assert_eq!(restored.len(), 2);
        assert_eq!(restored.get_metadata(keys::SUMMARY), Some(&json!("greeting")));
        assert_eq!(restored.sentences()[1].score(), Some(0.2));
        assert_eq!(restored.plain_text(), d.plain_text());
        assert_eq!(restored.sentences()[0].segments().len(), 1);
    }

    #[test]
    fn test_from_record_unknown_track() {
        let record = DocumentRecord {
            metadata: Metadata::new(),
            sentences: vec![SentenceRecord {
                start: 0.0,
                end: 1.0,
                tracks: BTreeMap::from([("audio".to_string(), json!({}))]),
                score: None,
                placeholder: false,
                segments: vec![],
            }],
        };
        let err = Document::from_record(record.clone(), &TrackRegistry::with_defaults(), &[]).unwrap_err();
        assert_eq!(err, ModelError::UnknownTrackType("audio".to_string()));

        let err = Document::from_record(record, &TrackRegistry::new(), &["text"]).unwrap_err();
        assert_eq!(err, ModelError::UnknownTrackType("text".to_string()));
    }

    #[test]
    fn test_empty_with_error() {
        let d = Document::empty_with_error("missing file");
        assert!(d.is_empty());
        assert_eq!(d.error(), Some("missing file"));
    }
}
