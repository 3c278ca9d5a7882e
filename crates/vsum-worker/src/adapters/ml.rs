//! Stage processors backed by the ML inference service.
//!
//! Every acquisition health-checks the service first, so a stage whose
//! backend is down fails before any item is touched.

use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, info};

use vsum_media::SpliceSettings;
use vsum_ml_client::MlClient;
use vsum_models::{Stage, TranscriptEntry};

use crate::adapters::FfmpegSplicer;
use crate::collaborators::{Embedder, KeyframeExtractor, Splicer, Summarizer, Transcriber};
use crate::config::MlServiceConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::provider::StageProvider;

/// Provider that serves model-backed stages from the inference sidecar and
/// splicing from ffmpeg.
#[derive(Debug, Clone)]
pub struct MlStageProvider {
    ml: MlServiceConfig,
    splice: SpliceSettings,
}

impl MlStageProvider {
    pub fn new(ml: MlServiceConfig, splice: SpliceSettings) -> Self {
        Self { ml, splice }
    }

    fn client(&self) -> WorkerResult<MlClient> {
        let config = self.ml.client_config()?;
        MlClient::new(config).map_err(|e| WorkerError::config_error(e.to_string()))
    }

    /// Build a client and confirm the sidecar answers before handing it out.
    async fn connect(&self, stage: Stage) -> WorkerResult<MlClient> {
        let client = self.client()?;
        client
            .health()
            .await
            .map_err(|e| WorkerError::collaborator(stage, format!("ML service unavailable: {}", e)))?;
        debug!(stage = %stage, url = %client.base_url(), "ML service healthy");
        Ok(client)
    }
}

#[async_trait]
impl StageProvider for MlStageProvider {
    fn validate(&self) -> WorkerResult<()> {
        self.client()?;
        if self.ml.summary_token_limit == 0 {
            return Err(WorkerError::config_error("VSUM_SUMMARY_TOKEN_LIMIT must be at least 1"));
        }
        Ok(())
    }

    async fn transcriber(&self) -> WorkerResult<Box<dyn Transcriber>> {
        let client = self.connect(Stage::Transcribe).await?;
        Ok(Box::new(MlTranscriber { client }))
    }

    async fn summarizer(&self) -> WorkerResult<Box<dyn Summarizer>> {
        let client = self.connect(Stage::Summarize).await?;
        Ok(Box::new(MlSummarizer {
            client,
            token_limit: self.ml.summary_token_limit,
        }))
    }

    async fn embedder(&self) -> WorkerResult<Box<dyn Embedder>> {
        let client = self.connect(Stage::Score).await?;
        Ok(Box::new(MlEmbedder { client }))
    }

    async fn keyframe_extractor(&self) -> WorkerResult<Box<dyn KeyframeExtractor>> {
        let client = self.connect(Stage::Keyframe).await?;
        Ok(Box::new(MlKeyframeExtractor { client }))
    }

    async fn splicer(&self) -> WorkerResult<Box<dyn Splicer>> {
        let splicer = FfmpegSplicer::acquire(self.splice.clone())
            .map_err(|e| WorkerError::collaborator(Stage::Splice, e.to_string()))?;
        Ok(Box::new(splicer))
    }
}

fn media_arg(media_path: &Path) -> String {
    media_path.to_string_lossy().to_string()
}

/// Transcription and diarization via the sidecar.
#[derive(Debug, Clone)]
pub struct MlTranscriber {
    client: MlClient,
}

#[async_trait]
impl Transcriber for MlTranscriber {
    async fn transcribe(&self, media_path: &Path) -> WorkerResult<Vec<TranscriptEntry>> {
        if !tokio::fs::try_exists(media_path).await? {
            return Err(WorkerError::collaborator(
                Stage::Transcribe,
                format!("media file not found: {}", media_path.display()),
            ));
        }
        Ok(self.client.transcribe(&media_arg(media_path)).await?)
    }
}

/// Split `text` into newline-joined chunks of whole lines whose whitespace
/// token count stays below `token_limit`.
///
/// A single line at or over the limit becomes its own chunk.
pub fn chunk_lines(text: &str, token_limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_tokens = 0usize;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let tokens = line.split_whitespace().count();
        if !current.is_empty() && current_tokens + tokens >= token_limit {
            chunks.push(current.join("\n"));
            current.clear();
            current_tokens = 0;
        }
        current.push(line);
        current_tokens += tokens;
    }
    if !current.is_empty() {
        chunks.push(current.join("\n"));
    }
    chunks
}

/// Chunked summarization via the sidecar.
///
/// Chunk summaries are joined with newlines, so each line of the result
/// summarizes one stretch of the transcript.
#[derive(Debug, Clone)]
pub struct MlSummarizer {
    client: MlClient,
    token_limit: usize,
}

#[async_trait]
impl Summarizer for MlSummarizer {
    async fn summarize(&self, text: &str) -> WorkerResult<String> {
        let chunks = chunk_lines(text, self.token_limit);
        let mut parts = Vec::with_capacity(chunks.len());
        for (idx, chunk) in chunks.iter().enumerate() {
            let summary = self.client.summarize(chunk, Some(self.token_limit)).await?;
            debug!(chunk = idx, of = chunks.len(), "Chunk summarized");
            let summary = summary.trim();
            if !summary.is_empty() {
                parts.push(summary.to_string());
            }
        }
        info!(chunks = chunks.len(), "Summary assembled");
        Ok(parts.join("\n"))
    }
}

/// Sentence embeddings via the sidecar.
#[derive(Debug, Clone)]
pub struct MlEmbedder {
    client: MlClient,
}

#[async_trait]
impl Embedder for MlEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> WorkerResult<Vec<Vec<f32>>> {
        Ok(self.client.embed(texts).await?)
    }
}

/// Keyframe salience via the sidecar.
#[derive(Debug, Clone)]
pub struct MlKeyframeExtractor {
    client: MlClient,
}

#[async_trait]
impl KeyframeExtractor for MlKeyframeExtractor {
    async fn extract(&self, media_path: &Path, boundaries: &[(f64, f64)]) -> WorkerResult<Vec<u32>> {
        if boundaries.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.client.keyframes(&media_arg(media_path), boundaries).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use vsum_ml_client::{MlClientConfig, RetryConfig};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> MlClient {
        MlClient::new(MlClientConfig::new(server.uri()))
            .unwrap()
            .with_retry(RetryConfig::new("test").with_base_delay(Duration::from_millis(1)))
    }

    #[test]
    fn test_chunk_lines_respects_limit() {
        let text = "a b c\nd e\nf g h i\nj";
        assert_eq!(chunk_lines(text, 6), vec!["a b c\nd e", "f g h i\nj"]);
        assert_eq!(chunk_lines(text, 100), vec![text.to_string()]);
    }

    #[test]
    fn test_chunk_lines_oversize_line_stands_alone() {
        let text = "one two three four\nfive";
        assert_eq!(chunk_lines(text, 2), vec!["one two three four", "five"]);
        assert!(chunk_lines("", 10).is_empty());
    }

    #[test]
    fn test_validate_requires_url() {
        let provider = MlStageProvider::new(MlServiceConfig::default(), SpliceSettings::default());
        assert!(provider.validate().unwrap_err().is_fatal_for_run());

        let provider = MlStageProvider::new(
            MlServiceConfig {
                url: Some("http://ml:8000".to_string()),
                ..Default::default()
            },
            SpliceSettings::default(),
        );
        provider.validate().unwrap();
    }

    #[tokio::test]
    async fn test_summarizer_joins_chunk_summaries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/summarize"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"summary": " Topic covered. "})))
            .expect(2)
            .mount(&server)
            .await;

        let summarizer = MlSummarizer {
            client: client_for(&server),
            token_limit: 4,
        };
        let summary = summarizer.summarize("A: one two\nB: three four five").await.unwrap();
        assert_eq!(summary, "Topic covered.\nTopic covered.");
    }

    #[tokio::test]
    async fn test_transcriber_rejects_missing_media() {
        let server = MockServer::start().await;
        let transcriber = MlTranscriber {
            client: client_for(&server),
        };
        let err = transcriber
            .transcribe(Path::new("/nonexistent/source_video.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Collaborator { stage: Stage::Transcribe, .. }));
    }

    #[tokio::test]
    async fn test_acquisition_checks_health() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let provider = MlStageProvider::new(
            MlServiceConfig {
                url: Some(server.uri()),
                ..Default::default()
            },
            SpliceSettings::default(),
        );
        let err = provider.embedder().await.err().unwrap();
        assert!(matches!(err, WorkerError::Collaborator { stage: Stage::Score, .. }));
    }
}
