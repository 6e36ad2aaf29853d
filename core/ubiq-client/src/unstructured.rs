//! Unstructured encryption pipeline.
//!
//! Seals arbitrary bytes under a per-message data key: the ciphertext opens
//! with a self-describing header (algorithm, IV, the server's encrypted data
//! key) that is also bound into the AEAD as associated data, followed by the
//! AES-GCM ciphertext and tag.
//!
//! The piecewise `begin`/`update`/`end` surface is a thin state machine over
//! the one-shot seal/open primitives; the underlying AEAD does not stream,
//! so `update` is single-shot.

use crate::algorithm::Algorithm;
use crate::datasets::{Dataset, DatasetKind};
use crate::error::{ClientError, ClientResult};
use crate::events::{Event, EventAction, EventAggregator};
use crate::keys::KeyManager;
use std::sync::Arc;
use ubiq_crypto::{aead, Header, FLAG_AAD};

/// Seals and opens unstructured payloads.
pub struct UnstructuredPipeline {
    keys: Arc<KeyManager>,
}

impl UnstructuredPipeline {
    pub fn new(keys: Arc<KeyManager>) -> Self {
        Self { keys }
    }

    /// Encrypts `plaintext` under a fresh (or default-cached) data key.
    pub async fn encrypt(&self, plaintext: &[u8]) -> ClientResult<Vec<u8>> {
        let key = self
            .keys
            .get_encryption_key(&Dataset::unstructured(""), false)
            .await?;
        let algorithm = key.algorithm.unwrap_or(Algorithm::Aes256Gcm);

        let iv = aead::random_iv(algorithm.iv_len());
        let flags = if algorithm.tag_len() > 0 { FLAG_AAD } else { 0 };
        let header = Header::new(algorithm.id(), flags, iv, key.encrypted_data_key.clone());

        let header_bytes = header.encode().map_err(ClientError::Crypto)?;
        let aad: &[u8] = if header.uses_aad() { &header_bytes } else { &[] };

        let sealed = aead::encrypt(&key.raw, &header.iv, aad, plaintext)?;

        let mut out = header_bytes;
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Decrypts a ciphertext produced by [`encrypt`](Self::encrypt),
    /// recovering the key the header points at.
    pub async fn decrypt(&self, data: &[u8]) -> ClientResult<Vec<u8>> {
        let header = Header::decode(data).map_err(ClientError::Crypto)?;
        // the id must be known even though the key length drives the cipher
        let _ = Algorithm::from_id(header.algorithm)?;

        let key = self
            .keys
            .get_decryption_key_unstructured(&header.encrypted_data_key)
            .await?;

        let boundary = header.encoded_len();
        let body = &data[boundary..];
        let aad: &[u8] = if header.uses_aad() {
            &data[..boundary]
        } else {
            &[]
        };

        Ok(aead::decrypt(&key.raw, &header.iv, aad, body)?)
    }
}

// ── Piecewise surface ──

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SessionState {
    Created,
    Begun,
    Updated,
    Ended,
}

/// Piecewise encryption session. `update` may be called exactly once.
pub struct EncryptSession {
    pipeline: Arc<UnstructuredPipeline>,
    events: EventAggregator,
    api_key: String,
    state: SessionState,
}

impl EncryptSession {
    pub(crate) fn new(
        pipeline: Arc<UnstructuredPipeline>,
        events: EventAggregator,
        api_key: String,
    ) -> Self {
        Self {
            pipeline,
            events,
            api_key,
            state: SessionState::Created,
        }
    }

    /// Starts the session. Produces no bytes; the header is emitted by
    /// `update`.
    pub fn begin(&mut self) -> ClientResult<Vec<u8>> {
        match self.state {
            SessionState::Created => {
                self.state = SessionState::Begun;
                Ok(Vec::new())
            }
            _ => Err(ClientError::State("begin called twice".to_string())),
        }
    }

    /// Seals the full plaintext. A second call fails: the AEAD does not
    /// support streaming updates.
    pub async fn update(&mut self, plaintext: &[u8]) -> ClientResult<Vec<u8>> {
        match self.state {
            SessionState::Begun => {
                self.state = SessionState::Updated;
                let sealed = self.pipeline.encrypt(plaintext).await?;
                self.record(EventAction::Encrypt).await?;
                Ok(sealed)
            }
            SessionState::Updated => Err(ClientError::State(
                "piecewise update is single-shot for this algorithm".to_string(),
            )),
            _ => Err(ClientError::State("update before begin".to_string())),
        }
    }

    /// Finishes the session. Seals an empty payload if `update` was never
    /// called.
    pub async fn end(&mut self) -> ClientResult<Vec<u8>> {
        match self.state {
            SessionState::Begun => {
                self.state = SessionState::Ended;
                let sealed = self.pipeline.encrypt(&[]).await?;
                self.record(EventAction::Encrypt).await?;
                Ok(sealed)
            }
            SessionState::Updated => {
                self.state = SessionState::Ended;
                Ok(Vec::new())
            }
            _ => Err(ClientError::State("end before begin".to_string())),
        }
    }

    async fn record(&self, action: EventAction) -> ClientResult<()> {
        self.events
            .add_or_increment(Event::new(
                &self.api_key,
                "",
                "",
                action,
                DatasetKind::Unstructured,
                0,
            ))
            .await
    }
}

/// Piecewise decryption session, mirroring [`EncryptSession`].
pub struct DecryptSession {
    pipeline: Arc<UnstructuredPipeline>,
    events: EventAggregator,
    api_key: String,
    state: SessionState,
}

impl DecryptSession {
    pub(crate) fn new(
        pipeline: Arc<UnstructuredPipeline>,
        events: EventAggregator,
        api_key: String,
    ) -> Self {
        Self {
            pipeline,
            events,
            api_key,
            state: SessionState::Created,
        }
    }

    pub fn begin(&mut self) -> ClientResult<Vec<u8>> {
        match self.state {
            SessionState::Created => {
                self.state = SessionState::Begun;
                Ok(Vec::new())
            }
            _ => Err(ClientError::State("begin called twice".to_string())),
        }
    }

    /// Opens the full ciphertext. A second call fails.
    pub async fn update(&mut self, ciphertext: &[u8]) -> ClientResult<Vec<u8>> {
        match self.state {
            SessionState::Begun => {
                self.state = SessionState::Updated;
                let opened = self.pipeline.decrypt(ciphertext).await?;
                self.events
                    .add_or_increment(Event::new(
                        &self.api_key,
                        "",
                        "",
                        EventAction::Decrypt,
                        DatasetKind::Unstructured,
                        0,
                    ))
                    .await?;
                Ok(opened)
            }
            SessionState::Updated => Err(ClientError::State(
                "piecewise update is single-shot for this algorithm".to_string(),
            )),
            _ => Err(ClientError::State("update before begin".to_string())),
        }
    }

    pub fn end(&mut self) -> ClientResult<Vec<u8>> {
        match self.state {
            SessionState::Begun | SessionState::Updated => {
                self.state = SessionState::Ended;
                Ok(Vec::new())
            }
            _ => Err(ClientError::State("end before begin".to_string())),
        }
    }
}
