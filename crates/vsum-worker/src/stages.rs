//! What each stage does to one item's document.
//!
//! Each function takes the collaborator for its stage and mutates (or, for
//! transcription, creates) the document. Failures carry the stage they
//! belong to.

use std::path::Path;

use serde_json::{json, Value};
use tracing::debug;

use vsum_media::SpliceOutcome;
use vsum_models::{
    build_document, keys, merge_ranges, Document, Stage, TimeRange, TrackOperation, TrackRegistry, KEYFRAME_TRACK,
    TEXT_TRACK,
};

use crate::collaborators::{Embedder, KeyframeExtractor, Splicer, Summarizer, Transcriber};
use crate::config::FilterConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::filter::{apply_filter, FilterStats};

/// Tracks every pipeline document carries.
pub const PIPELINE_TRACKS: [&str; 2] = [TEXT_TRACK, KEYFRAME_TRACK];

/// Transcribe `media_path` and segment the result into a document.
pub async fn transcribe(
    transcriber: &dyn Transcriber,
    media_path: &Path,
    registry: &TrackRegistry,
) -> WorkerResult<Document> {
    let entries = transcriber.transcribe(media_path).await?;
    let doc = build_document(&entries, registry, &PIPELINE_TRACKS).map_err(|e| e_for(Stage::Transcribe, e))?;
    debug!(entries = entries.len(), sentences = doc.len(), "Transcript segmented");
    Ok(doc)
}

/// Summarize the rendered transcript into the `summary` metadata key.
pub async fn summarize(summarizer: &dyn Summarizer, doc: &mut Document) -> WorkerResult<()> {
    let text = doc.plain_text();
    if text.trim().is_empty() {
        return Err(WorkerError::validation(Stage::Summarize, "document has no spoken text"));
    }
    let summary = summarizer.summarize(&text).await?;
    if summary.trim().is_empty() {
        return Err(WorkerError::validation(Stage::Summarize, "summarizer returned an empty summary"));
    }
    doc.add_metadata(keys::SUMMARY, Value::String(summary))
        .map_err(|e| e_for(Stage::Summarize, e))
}

/// Embed every spoken sentence and score it by its best cosine similarity
/// to any summary line.
///
/// Placeholder sentences get score `0.0` and no embedding. Negative
/// similarities are floored at `0.0`.
pub async fn score(embedder: &dyn Embedder, doc: &mut Document) -> WorkerResult<()> {
    let summary_lines: Vec<String> = doc
        .get_metadata(keys::SUMMARY)
        .and_then(Value::as_str)
        .map(|s| {
            s.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();
    if summary_lines.is_empty() {
        return Err(WorkerError::validation(Stage::Score, "document has no summary to score against"));
    }

    let spoken: Vec<usize> = doc
        .sentences()
        .iter()
        .enumerate()
        .filter(|(_, s)| !s.is_placeholder())
        .map(|(i, _)| i)
        .collect();
    let rendered: Vec<String> = spoken.iter().map(|i| doc.sentences()[*i].to_string()).collect();

    let sentence_vectors = embedder.embed_batch(&rendered).await?;
    let summary_vectors = embedder.embed_batch(&summary_lines).await?;
    if sentence_vectors.len() != rendered.len() || summary_vectors.len() != summary_lines.len() {
        return Err(WorkerError::validation(
            Stage::Score,
            format!(
                "expected {} embeddings, got {}",
                rendered.len() + summary_lines.len(),
                sentence_vectors.len() + summary_vectors.len()
            ),
        ));
    }

    let mut embeddings = vec![json!([]); doc.len()];
    let mut scores = vec![json!(0.0); doc.len()];
    for (idx, vector) in spoken.into_iter().zip(sentence_vectors) {
        let best = summary_vectors
            .iter()
            .map(|s| embedder.similarity(&vector, s))
            .fold(0.0f64, f64::max);
        scores[idx] = json!(best);
        embeddings[idx] = json!(vector);
    }

    doc.call_track_method(TrackOperation::SetEmbedding, Some(TEXT_TRACK), Some(&embeddings))
        .map_err(|e| e_for(Stage::Score, e))?;
    doc.call_track_method(TrackOperation::SetScore, Some(TEXT_TRACK), Some(&scores))
        .map_err(|e| e_for(Stage::Score, e))?;
    Ok(())
}

/// Attach keyframe salience counts to every sentence, placeholders included.
pub async fn keyframe(extractor: &dyn KeyframeExtractor, media_path: &Path, doc: &mut Document) -> WorkerResult<()> {
    let boundaries: Vec<(f64, f64)> = doc.sentences().iter().map(|s| s.timestamp()).collect();
    let counts = extractor.extract(media_path, &boundaries).await?;
    if counts.len() != boundaries.len() {
        return Err(WorkerError::validation(
            Stage::Keyframe,
            format!("expected {} keyframe counts, got {}", boundaries.len(), counts.len()),
        ));
    }

    let scores: Vec<Value> = counts.iter().map(|c| json!(*c as f64)).collect();
    doc.call_track_method(TrackOperation::SetScore, Some(KEYFRAME_TRACK), Some(&scores))
        .map_err(|e| e_for(Stage::Keyframe, e))?;
    Ok(())
}

/// Run the filtering engine.
pub fn filter(doc: &mut Document, config: &FilterConfig) -> WorkerResult<FilterStats> {
    apply_filter(doc, config).map_err(|e| e.for_stage(Stage::Filter))
}

/// Retained ranges recorded by the filter stage, merged and ordered.
pub fn retained_ranges(doc: &Document) -> WorkerResult<Vec<TimeRange>> {
    let raw = doc
        .get_metadata(keys::FILTERED_SENTENCES)
        .ok_or_else(|| WorkerError::validation(Stage::Splice, "document has no filtered_sentences"))?;
    let ranges: Vec<TimeRange> = serde_json::from_value(raw.clone())
        .map_err(|e| WorkerError::validation(Stage::Splice, format!("malformed filtered_sentences: {}", e)))?;
    Ok(merge_ranges(&ranges))
}

/// Cut the source media down to the retained ranges.
pub async fn splice(
    splicer: &dyn Splicer,
    media_path: &Path,
    output_path: &Path,
    doc: &mut Document,
) -> WorkerResult<SpliceOutcome> {
    let ranges = retained_ranges(doc)?;
    if ranges.is_empty() {
        return Err(WorkerError::validation(Stage::Splice, "no sentences were retained"));
    }
    let outcome = splicer.splice(media_path, &ranges, output_path).await?;
    doc.upsert_metadata(
        keys::SPLICED_OUTPUT,
        json!({
            "path": output_path.to_string_lossy(),
            "ranges": ranges.len(),
        }),
    );
    Ok(outcome)
}

fn e_for(stage: Stage, e: vsum_models::ModelError) -> WorkerError {
    WorkerError::Model(e).for_stage(stage)
}
