//! Contracts for the external processors each stage delegates to.
//!
//! Implementations wrap heavyweight resources (model sessions, sidecar
//! connections, encoder binaries). The executor acquires one per stage per
//! batch and drops it before the next stage starts.

use std::path::Path;

use async_trait::async_trait;

use vsum_media::SpliceOutcome;
use vsum_models::{TimeRange, TranscriptEntry};

use crate::error::WorkerResult;

/// Speech recognition with speaker diarization.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Time-aligned, speaker-labelled entries in chronological order.
    async fn transcribe(&self, media_path: &Path) -> WorkerResult<Vec<TranscriptEntry>>;
}

/// Abstractive text summarization.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str) -> WorkerResult<String>;
}

/// Sentence embedding and similarity.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// One vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> WorkerResult<Vec<Vec<f32>>>;

    async fn embed(&self, text: &str) -> WorkerResult<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        Ok(vectors.pop().unwrap_or_default())
    }

    fn similarity(&self, a: &[f32], b: &[f32]) -> f64 {
        cosine_similarity(a, b)
    }
}

/// Per-span keyframe salience.
#[async_trait]
pub trait KeyframeExtractor: Send + Sync {
    /// One salience count per boundary, in boundary order.
    async fn extract(&self, media_path: &Path, boundaries: &[(f64, f64)]) -> WorkerResult<Vec<u32>>;
}

/// Cuts a media file down to the retained ranges.
#[async_trait]
pub trait Splicer: Send + Sync {
    async fn splice(&self, input: &Path, ranges: &[TimeRange], output: &Path) -> WorkerResult<SpliceOutcome>;
}

/// Cosine similarity; zero when either vector has zero norm or the
/// dimensions differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
