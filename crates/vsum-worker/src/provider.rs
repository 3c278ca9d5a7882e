//! Stage processor acquisition.

use async_trait::async_trait;

use crate::collaborators::{Embedder, KeyframeExtractor, Splicer, Summarizer, Transcriber};
use crate::error::WorkerResult;

/// Factory for the processors each stage needs.
///
/// Acquisition is lazy: the executor only asks for a processor when at least
/// one item in the batch still needs the stage, and releases it by dropping
/// the returned box once the stage finishes.
#[async_trait]
pub trait StageProvider: Send + Sync {
    /// Check settings before any item is processed.
    ///
    /// Errors returned here abort the run.
    fn validate(&self) -> WorkerResult<()> {
        Ok(())
    }

    async fn transcriber(&self) -> WorkerResult<Box<dyn Transcriber>>;

    async fn summarizer(&self) -> WorkerResult<Box<dyn Summarizer>>;

    async fn embedder(&self) -> WorkerResult<Box<dyn Embedder>>;

    async fn keyframe_extractor(&self) -> WorkerResult<Box<dyn KeyframeExtractor>>;

    async fn splicer(&self) -> WorkerResult<Box<dyn Splicer>>;
}
