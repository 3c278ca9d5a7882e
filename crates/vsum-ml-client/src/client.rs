//! HTTP client for the inference sidecar.

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use vsum_models::TranscriptEntry;

use crate::error::{MlClientError, MlClientResult};
use crate::retry::{retry_async, RetryConfig};
use crate::types::*;

/// Connection settings for the sidecar.
#[derive(Debug, Clone)]
pub struct MlClientConfig {
    /// Base URL, e.g. `http://localhost:8000`
    pub base_url: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// Retries for transient failures
    pub max_retries: u32,
}

impl MlClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(600),
            max_retries: 2,
        }
    }
}

/// Inference sidecar client.
#[derive(Debug, Clone)]
pub struct MlClient {
    client: Client,
    base_url: String,
    retry: RetryConfig,
}

impl MlClient {
    /// Create a new client.
    pub fn new(config: MlClientConfig) -> MlClientResult<Self> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(MlClientError::config_error(format!(
                "ML service URL must be http(s): {}",
                config.base_url
            )));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| MlClientError::config_error(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            retry: RetryConfig::new("ml_request").with_max_retries(config.max_retries),
        })
    }

    /// Override the retry policy (tests use a zero base delay).
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check that the sidecar is reachable.
    pub async fn health(&self) -> MlClientResult<()> {
        let endpoint = "health";
        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| MlClientError::Request {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            })?;
        let health: HealthResponse = decode(endpoint, response).await?;
        if health.status != "ok" {
            return Err(MlClientError::invalid_response(endpoint, format!("status {}", health.status)));
        }
        Ok(())
    }

    /// Transcribe and diarize a media file.
    pub async fn transcribe(&self, media_path: &str) -> MlClientResult<Vec<TranscriptEntry>> {
        let response: TranscribeResponse = self
            .post("transcribe", &TranscribeRequest { media_path })
            .await?;
        info!(media_path = %media_path, entries = response.entries.len(), "Transcription received");
        Ok(response.entries)
    }

    /// Summarize one chunk of text.
    pub async fn summarize(&self, text: &str, max_tokens: Option<usize>) -> MlClientResult<String> {
        let response: SummarizeResponse = self
            .post("summarize", &SummarizeRequest { text, max_tokens })
            .await?;
        Ok(response.summary)
    }

    /// Embed a batch of texts; one vector per input, in order.
    pub async fn embed(&self, texts: &[String]) -> MlClientResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let response: EmbedResponse = self.post("embed", &EmbedRequest { texts }).await?;
        if response.embeddings.len() != texts.len() {
            return Err(MlClientError::invalid_response(
                "embed",
                format!("expected {} embeddings, got {}", texts.len(), response.embeddings.len()),
            ));
        }
        Ok(response.embeddings)
    }

    /// Per-boundary keyframe salience counts.
    pub async fn keyframes(&self, media_path: &str, boundaries: &[(f64, f64)]) -> MlClientResult<Vec<u32>> {
        let response: KeyframeResponse = self
            .post("keyframes", &KeyframeRequest { media_path, boundaries })
            .await?;
        if response.counts.len() != boundaries.len() {
            return Err(MlClientError::invalid_response(
                "keyframes",
                format!("expected {} counts, got {}", boundaries.len(), response.counts.len()),
            ));
        }
        Ok(response.counts)
    }

    async fn post<B, R>(&self, endpoint: &str, body: &B) -> MlClientResult<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, endpoint);
        let url = url.as_str();
        let client = &self.client;
        let retry = self.retry.named(endpoint);

        retry_async(&retry, MlClientError::is_retryable, || async move {
            debug!(endpoint = %endpoint, "Sending ML request");
            let response = client
                .post(url)
                .json(body)
                .send()
                .await
                .map_err(|e| MlClientError::Request {
                    endpoint: endpoint.to_string(),
                    message: e.to_string(),
                })?;
            decode(endpoint, response).await
        })
        .await
    }
}

async fn decode<R: DeserializeOwned>(endpoint: &str, response: reqwest::Response) -> MlClientResult<R> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(MlClientError::Status {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            body,
        });
    }

    response.json::<R>().await.map_err(|e| MlClientError::Decode {
        endpoint: endpoint.to_string(),
        message: e.to_string(),
    })
}
