//! Client error types.

use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur talking to the KMS or running a protection
/// pipeline.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid credentials: {0}")]
    Credentials(String),

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("KMS request failed with status {status}: {message}")]
    Kms { status: u16, message: String },

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("invalid input: {0}")]
    InputInvalid(String),

    /// Piecewise API misuse (double begin, update before begin, ...).
    #[error("invalid operation state: {0}")]
    State(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Crypto(#[from] ubiq_crypto::CryptoError),
}

impl ClientError {
    /// Builds a `Kms` error from a response the server rejected.
    pub fn kms(status: u16, message: impl Into<String>) -> Self {
        Self::Kms {
            status,
            message: message.into(),
        }
    }
}
