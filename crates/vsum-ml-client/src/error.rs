//! ML client error types.

use thiserror::Error;

/// Result type for ML client operations.
pub type MlClientResult<T> = Result<T, MlClientError>;

/// Errors returned by the inference sidecar client.
#[derive(Debug, Error)]
pub enum MlClientError {
    #[error("Invalid client configuration: {0}")]
    Config(String),

    #[error("Request to {endpoint} failed: {message}")]
    Request { endpoint: String, message: String },

    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Failed to decode {endpoint} response: {message}")]
    Decode { endpoint: String, message: String },

    #[error("Invalid response from {endpoint}: {message}")]
    InvalidResponse { endpoint: String, message: String },
}

impl MlClientError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_response(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Transport failures, timeouts and 5xx/429 responses are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            MlClientError::Request { .. } => true,
            MlClientError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}
