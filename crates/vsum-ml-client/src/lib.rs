//! Client for the inference sidecar service.
//!
//! The sidecar hosts the heavyweight models (speech recognition with
//! diarization, summarization, sentence embedding, keyframe clustering)
//! behind a small JSON-over-HTTP API. Media paths are passed by reference;
//! the sidecar reads them from a shared filesystem.

pub mod client;
pub mod error;
pub mod retry;
pub mod types;

pub use client::{MlClient, MlClientConfig};
pub use error::{MlClientError, MlClientResult};
pub use retry::{retry_async, RetryConfig};
pub use types::*;
