//! Per-stage completion checks against persisted state.
//!
//! A stage is skipped for an item when its output is already present in the
//! loaded document (or, for splicing, on disk).

use std::path::Path;

use vsum_models::{keys, Document, Stage, KEYFRAME_TRACK, TEXT_TRACK};

/// Whether `stage`'s output for this item is already persisted.
pub fn is_complete(stage: Stage, document: Option<&Document>, spliced_path: &Path) -> bool {
    match stage {
        Stage::Splice => spliced_path.exists(),
        _ => document.map(|doc| document_has_output(stage, doc)).unwrap_or(false),
    }
}

fn document_has_output(stage: Stage, doc: &Document) -> bool {
    match stage {
        Stage::Transcribe => {
            !doc.is_empty()
                && doc.error().is_none()
                && doc.sentences().iter().filter(|s| !s.is_placeholder()).all(|s| {
                    s.track(TEXT_TRACK)
                        .and_then(|t| t.text())
                        .map(|text| !text.trim().is_empty())
                        .unwrap_or(false)
                })
        }
        Stage::Summarize => doc.has_metadata(keys::SUMMARY),
        Stage::Score => doc.sentences().iter().all(|s| match s.track(TEXT_TRACK) {
            Some(track) => track.score().is_some() && (s.is_placeholder() || track.embedding().is_some()),
            None => false,
        }),
        Stage::Keyframe => doc
            .sentences()
            .iter()
            .all(|s| s.track(KEYFRAME_TRACK).and_then(|t| t.score()).is_some()),
        Stage::Filter => doc.has_metadata(keys::FILTERED_SENTENCES),
        Stage::Splice => false,
    }
}
