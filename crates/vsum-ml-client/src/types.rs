//! Request and response bodies of the sidecar API.

use serde::{Deserialize, Serialize};

use vsum_models::TranscriptEntry;

#[derive(Debug, Serialize)]
pub struct TranscribeRequest<'a> {
    pub media_path: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct TranscribeResponse {
    pub entries: Vec<TranscriptEntry>,
}

#[derive(Debug, Serialize)]
pub struct SummarizeRequest<'a> {
    pub text: &'a str,
    /// Upper bound on summary length, in model tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct SummarizeResponse {
    pub summary: String,
}

#[derive(Debug, Serialize)]
pub struct EmbedRequest<'a> {
    pub texts: &'a [String],
}

#[derive(Debug, Deserialize)]
pub struct EmbedResponse {
    pub embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Serialize)]
pub struct KeyframeRequest<'a> {
    pub media_path: &'a str,
    pub boundaries: &'a [(f64, f64)],
}

#[derive(Debug, Deserialize)]
pub struct KeyframeResponse {
    pub counts: Vec<u32>,
}

#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}
