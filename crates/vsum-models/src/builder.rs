//! Sentence segmentation of raw transcript entries.

use serde_json::json;
use serde_json::Value;

use crate::document::{Document, Metadata};
use crate::error::{ModelError, ModelResult};
use crate::registry::TrackRegistry;
use crate::segment::{Segment, TranscriptEntry, UNKNOWN_SPEAKER};
use crate::sentence::Sentence;
use crate::timestamp::validate_span;
use crate::track::TEXT_TRACK;

fn closes_sentence(text: &str) -> bool {
    text.ends_with('.') || text.ends_with('?') || text.ends_with('!')
}

fn opens_sentence(text: &str) -> bool {
    text.chars().next().is_some_and(char::is_uppercase)
}

/// Group transcript entries into sentences and build a document.
///
/// An entry ending in `.`, `?` or `!` closes the current sentence; an entry
/// starting with an uppercase letter opens a new one. Gaps between
/// consecutive sentences are filled with placeholder sentences so that
/// [`Document::find_sentence`] is total over the covered range. A group made
/// only of empty-text entries becomes a placeholder over its span.
///
/// Every name in `tracks` must be registered. The `text` track, when
/// requested, is seeded with the sentence text and dominant speaker; other
/// tracks start empty.
pub fn build_document(
    entries: &[TranscriptEntry],
    registry: &TrackRegistry,
    tracks: &[&str],
) -> ModelResult<Document> {
    if entries.is_empty() {
        return Err(ModelError::EmptyTranscript);
    }
    registry.ensure_registered(tracks.iter().copied())?;

    let mut previous_end: Option<f64> = None;
    for entry in entries {
        validate_span(entry.start, entry.end)?;
        if let Some(prev) = previous_end {
            if entry.start < prev {
                return Err(ModelError::OutOfOrder {
                    start: entry.start,
                    previous_end: prev,
                });
            }
        }
        previous_end = Some(entry.end);
    }

    let mut groups: Vec<Vec<Segment>> = Vec::new();
    let mut current: Vec<Segment> = Vec::new();
    for entry in entries {
        let segment = Segment::try_from(entry)?;
        if !current.is_empty() && opens_sentence(segment.text()) {
            groups.push(std::mem::take(&mut current));
        }
        let closes = closes_sentence(segment.text());
        current.push(segment);
        if closes {
            groups.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        groups.push(current);
    }

    let mut sentences: Vec<Sentence> = Vec::with_capacity(groups.len());
    for group in groups {
        let sentence = Sentence::new(group)?;
        // A sentence with no spoken text only covers time.
        let sentence = if sentence.joined_text().trim().is_empty() {
            Sentence::placeholder(sentence.start(), sentence.end())?
        } else {
            sentence
        };
        if let Some(last) = sentences.last() {
            if sentence.start() > last.end() {
                let mut gap = Sentence::placeholder(last.end(), sentence.start())?;
                attach_tracks(&mut gap, registry, tracks)?;
                sentences.push(gap);
            }
        }
        let mut sentence = sentence;
        attach_tracks(&mut sentence, registry, tracks)?;
        sentences.push(sentence);
    }

    Document::new(sentences, Metadata::new())
}

fn attach_tracks(sentence: &mut Sentence, registry: &TrackRegistry, tracks: &[&str]) -> ModelResult<()> {
    for name in tracks {
        let data = if *name == TEXT_TRACK {
            text_track_seed(sentence)
        } else {
            Value::Null
        };
        let track = registry.create(name, data)?;
        sentence.insert_track(*name, track);
    }
    Ok(())
}

fn text_track_seed(sentence: &Sentence) -> Value {
    json!({
        "text": sentence.joined_text(),
        "speaker": sentence.dominant_speaker().unwrap_or(UNKNOWN_SPEAKER),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::KEYFRAME_TRACK;

    fn entry(text: &str, start: f64, end: f64, speaker: &str) -> TranscriptEntry {
        TranscriptEntry::new(text, start, end, speaker)
    }

    fn defaults() -> TrackRegistry {
        TrackRegistry::with_defaults()
    }

    #[test]
    fn test_two_sentences_from_hello_world() {
        let entries = vec![entry("Hello.", 0.0, 1.0, "A"), entry("World.", 1.0, 2.0, "B")];
        let doc = build_document(&entries, &defaults(), &[TEXT_TRACK, KEYFRAME_TRACK]).unwrap();

        assert_eq!(doc.len(), 2);
        assert_eq!(doc.start(), Some(0.0));
        assert_eq!(doc.end(), Some(2.0));
        assert_eq!(doc.plain_text(), "A: Hello.\nB: World.");
        assert!(doc.sentences().iter().all(|s| s.has_track(KEYFRAME_TRACK)));
    }

    #[test]
    fn test_fragments_join_until_punctuation() {
        let entries = vec![
            entry("So this", 0.0, 1.0, "A"),
            entry("is it.", 1.0, 2.0, "A"),
            entry("Next one", 2.0, 3.0, "B"),
            entry("continues", 3.0, 4.0, "B"),
            entry("Then a new", 4.0, 5.0, "B"),
        ];
        let doc = build_document(&entries, &defaults(), &[TEXT_TRACK]).unwrap();
        let texts: Vec<String> = doc.sentences().iter().map(|s| s.joined_text()).collect();
        assert_eq!(texts, vec!["So this is it.", "Next one continues", "Then a new"]);
    }

    #[test]
    fn test_gap_gets_placeholder() {
        let entries = vec![entry("First.", 5.0, 10.0, "A"), entry("Second.", 15.0, 20.0, "A")];
        let doc = build_document(&entries, &defaults(), &[TEXT_TRACK]).unwrap();

        assert_eq!(doc.len(), 3);
        let gap = doc.find_sentence(12.0).unwrap();
        assert!(gap.is_placeholder());
        assert_eq!(gap.timestamp(), (10.0, 15.0));
        assert_eq!(gap.joined_text(), "");
        assert!(doc.find_sentence(4.0).is_none());
        assert_eq!(doc.plain_text(), "A: First.\nA: Second.");
    }

    #[test]
    fn test_empty_text_entry_becomes_placeholder() {
        let entries = vec![
            entry("This is important.", 0.0, 2.0, "A"),
            entry("", 2.0, 3.0, "B"),
            entry("Other words.", 3.0, 4.0, "B"),
        ];
        let doc = build_document(&entries, &defaults(), &[TEXT_TRACK]).unwrap();

        assert_eq!(doc.len(), 3);
        let silent = doc.find_sentence(2.5).unwrap();
        assert!(silent.is_placeholder());
        assert_eq!(silent.timestamp(), (2.0, 3.0));
        assert!(doc
            .sentences()
            .iter()
            .filter(|s| !s.is_placeholder())
            .all(|s| !s.joined_text().is_empty()));
        assert_eq!(doc.plain_text(), "A: This is important.\nB: Other words.");
    }

    #[test]
    fn test_malformed_input_rejected() {
        let registry = defaults();
        assert_eq!(
            build_document(&[], &registry, &[TEXT_TRACK]).unwrap_err(),
            ModelError::EmptyTranscript
        );
        assert!(matches!(
            build_document(&[entry("x.", 3.0, 1.0, "A")], &registry, &[TEXT_TRACK]),
            Err(ModelError::InvalidSpan { .. })
        ));
        assert!(matches!(
            build_document(
                &[entry("a.", 0.0, 2.0, "A"), entry("b.", 1.0, 3.0, "A")],
                &registry,
                &[TEXT_TRACK]
            ),
            Err(ModelError::OutOfOrder { .. })
        ));
        assert!(matches!(
            build_document(&[entry("a.", 0.0, 1.0, "A")], &registry, &["audio"]),
            Err(ModelError::UnknownTrackType(_))
        ));
    }
}
