//! Crypto error types.

use thiserror::Error;

/// Result type for cryptographic operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur in cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// AEAD tag mismatch or otherwise unauthenticated ciphertext.
    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("malformed ciphertext header: {0}")]
    BadHeader(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Radix rendering needed more characters than the slot provides.
    #[error("numeral overflow: {0}")]
    Overflow(String),

    #[error("data key unwrap failed: {0}")]
    Unwrap(String),

    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
}
