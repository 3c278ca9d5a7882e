//! Sentences: time-contiguous groups of segments carrying annotation tracks.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{ModelError, ModelResult};
use crate::segment::Segment;
use crate::timestamp::{validate_span, TimeRange};
use crate::track::{Track, TEXT_TRACK};

/// One unit of scoring, filtering and splicing.
///
/// Boundaries are fixed at construction. Tracks and the aggregate score are
/// filled in by later stages.
pub struct Sentence {
    start: f64,
    end: f64,
    segments: Vec<Segment>,
    tracks: BTreeMap<String, Box<dyn Track>>,
    score: Option<f64>,
    placeholder: bool,
}

impl Sentence {
    /// Build a sentence from its segments.
    ///
    /// Segments must be non-empty, ordered and non-overlapping.
    pub fn new(segments: Vec<Segment>) -> ModelResult<Self> {
        let (first, last) = match (segments.first(), segments.last()) {
            (Some(first), Some(last)) => (first.start(), last.end()),
            _ => return Err(ModelError::EmptyTranscript),
        };

        for pair in segments.windows(2) {
            if pair[1].start() < pair[0].end() {
                return Err(ModelError::OutOfOrder {
                    start: pair[1].start(),
                    previous_end: pair[0].end(),
                });
            }
        }
        validate_span(first, last)?;

        Ok(Self {
            start: first,
            end: last,
            segments,
            tracks: BTreeMap::new(),
            score: None,
            placeholder: false,
        })
    }

    /// Zero-content sentence covering a gap between two real sentences.
    pub fn placeholder(start: f64, end: f64) -> ModelResult<Self> {
        validate_span(start, end)?;
        Ok(Self {
            start,
            end,
            segments: Vec::new(),
            tracks: BTreeMap::new(),
            score: None,
            placeholder: true,
        })
    }

    /// Restore a sentence from persisted parts without re-deriving boundaries.
    pub(crate) fn restore(
        start: f64,
        end: f64,
        segments: Vec<Segment>,
        score: Option<f64>,
        placeholder: bool,
    ) -> ModelResult<Self> {
        validate_span(start, end)?;
        Ok(Self {
            start,
            end,
            segments,
            tracks: BTreeMap::new(),
            score,
            placeholder,
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

    pub fn range(&self) -> TimeRange {
        TimeRange {
            start: self.start,
            end: self.end,
        }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Inclusive on both ends.
    pub fn contains(&self, ts: f64) -> bool {
        self.start <= ts && ts <= self.end
    }

    pub fn find_segment(&self, ts: f64) -> Option<&Segment> {
        self.segments.iter().find(|s| s.contains(ts))
    }

    /// Segment texts joined with single spaces.
    pub fn joined_text(&self) -> String {
        self.segments
            .iter()
            .map(Segment::text)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Speaker with the most total segment duration; earliest wins ties.
    pub fn dominant_speaker(&self) -> Option<&str> {
        let mut totals: Vec<(&str, f64)> = Vec::new();
        for segment in &self.segments {
            match totals.iter_mut().find(|(s, _)| *s == segment.speaker()) {
                Some((_, total)) => *total += segment.duration(),
                None => totals.push((segment.speaker(), segment.duration())),
            }
        }

        let mut best: Option<(&str, f64)> = None;
        for (speaker, total) in totals {
            if best.map_or(true, |(_, b)| total > b) {
                best = Some((speaker, total));
            }
        }
        best.map(|(speaker, _)| speaker)
    }

    pub fn track(&self, name: &str) -> Option<&dyn Track> {
        self.tracks.get(name).map(|t| &**t)
    }

    pub fn track_mut(&mut self, name: &str) -> Option<&mut (dyn Track + 'static)> {
        self.tracks.get_mut(name).map(|t| &mut **t)
    }

    /// Typed access to a track, e.g. `sentence.track_as::<TextTrack>("text")`.
    pub fn track_as<T: Track + 'static>(&self, name: &str) -> Option<&T> {
        self.tracks.get(name).and_then(|t| t.as_any().downcast_ref::<T>())
    }

    pub fn tracks(&self) -> impl Iterator<Item = (&str, &dyn Track)> {
        self.tracks.iter().map(|(k, v)| (k.as_str(), &**v))
    }

    pub(crate) fn tracks_mut(&mut self) -> impl Iterator<Item = (&String, &mut Box<dyn Track>)> {
        self.tracks.iter_mut()
    }

    pub fn has_track(&self, name: &str) -> bool {
        self.tracks.contains_key(name)
    }

    /// Attach a track, replacing any existing track of the same name.
    pub fn insert_track(&mut self, name: impl Into<String>, track: Box<dyn Track>) {
        self.tracks.insert(name.into(), track);
    }

    /// Aggregate (combined) score written by the filtering engine.
    pub fn score(&self) -> Option<f64> {
        self.score
    }

    pub fn set_score(&mut self, score: f64) {
        self.score = Some(score);
    }
}

impl Clone for Sentence {
    fn clone(&self) -> Self {
        Self {
            start: self.start,
            end: self.end,
            segments: self.segments.clone(),
            tracks: self.tracks.clone(),
            score: self.score,
            placeholder: self.placeholder,
        }
    }
}

impl fmt::Debug for Sentence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sentence")
            .field("start", &self.start)
            .field("end", &self.end)
            .field("segments", &self.segments.len())
            .field("tracks", &self.tracks.keys().collect::<Vec<_>>())
            .field("score", &self.score)
            .field("placeholder", &self.placeholder)
            .finish()
    }
}

impl fmt::Display for Sentence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tracks.get(TEXT_TRACK) {
            Some(track) => write!(f, "{}", track),
            None => f.write_str(&self.joined_text()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::TextTrack;

    fn seg(start: f64, end: f64, text: &str, speaker: &str) -> Segment {
        Segment::new(start, end, text, speaker).unwrap()
    }

    #[test]
    fn test_sentence_bounds_follow_segments() {
        let sentence = Sentence::new(vec![seg(1.0, 2.0, "Hello", "A"), seg(2.0, 3.5, "there.", "A")]).unwrap();
        assert_eq!(sentence.timestamp(), (1.0, 3.5));
        assert_eq!(sentence.joined_text(), "Hello there.");
        assert_eq!(sentence.find_segment(2.5).map(Segment::text), Some("there."));
        assert!(sentence.contains(3.5));
        assert!(!sentence.is_placeholder());
    }

    #[test]
    fn test_sentence_rejects_overlapping_segments() {
        let err = Sentence::new(vec![seg(0.0, 2.0, "a", "A"), seg(1.0, 3.0, "b", "A")]).unwrap_err();
        assert!(matches!(err, ModelError::OutOfOrder { .. }));
        assert!(matches!(Sentence::new(vec![]), Err(ModelError::EmptyTranscript)));
    }

    #[test]
    fn test_dominant_speaker_by_duration() {
        let sentence = Sentence::new(vec![
            seg(0.0, 1.0, "a", "A"),
            seg(1.0, 4.0, "b", "B"),
            seg(4.0, 5.0, "c", "A"),
        ])
        .unwrap();
        assert_eq!(sentence.dominant_speaker(), Some("B"));

        let tie = Sentence::new(vec![seg(0.0, 1.0, "a", "A"), seg(1.0, 2.0, "b", "B")]).unwrap();
        assert_eq!(tie.dominant_speaker(), Some("A"));
    }

    #[test]
    fn test_display_prefers_text_track() {
        let mut sentence = Sentence::new(vec![seg(0.0, 1.0, "Hi.", "A")]).unwrap();
        assert_eq!(sentence.to_string(), "Hi.");

        sentence.insert_track(TEXT_TRACK, Box::new(TextTrack::new("Hi.", "A")));
        assert_eq!(sentence.to_string(), "A: Hi.");
        assert_eq!(sentence.track_as::<TextTrack>(TEXT_TRACK).map(|t| t.speaker.as_str()), Some("A"));

        let cloned = sentence.clone();
        assert!(cloned.has_track(TEXT_TRACK));
    }
}
