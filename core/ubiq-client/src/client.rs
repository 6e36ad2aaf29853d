//! Top-level client facade.
//!
//! Constructs and owns every manager over one shared signed HTTP client —
//! there are no globals, so independent clients (and tests) never share
//! state. Every successful operation enqueues a usage event; pending events
//! flush on `close()` and, best-effort, on drop.

use crate::config::Configuration;
use crate::credentials::Credentials;
use crate::datasets::{DatasetKind, DatasetManager};
use crate::error::ClientResult;
use crate::events::{Event, EventAction, EventAggregator};
use crate::http::SignedClient;
use crate::keys::KeyManager;
use crate::structured::StructuredPipeline;
use crate::unstructured::{DecryptSession, EncryptSession, UnstructuredPipeline};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Client for the Ubiq platform: unstructured (AES-GCM) and structured
/// (FF1 format-preserving) encryption against KMS-issued data keys.
pub struct UbiqClient {
    creds: Credentials,
    datasets: Arc<DatasetManager>,
    structured: StructuredPipeline,
    unstructured: Arc<UnstructuredPipeline>,
    events: EventAggregator,
    destroy_report_async: bool,
}

impl UbiqClient {
    pub fn new(creds: Credentials, config: Configuration) -> Self {
        let http = Arc::new(SignedClient::new(&creds));
        let keys = Arc::new(KeyManager::new(
            Arc::clone(&http),
            creds.clone(),
            config.key_caching.clone(),
        ));
        let datasets = Arc::new(DatasetManager::new(
            Arc::clone(&http),
            creds.clone(),
            config.dataset_caching.enabled,
        ));
        let structured = StructuredPipeline::new(
            Arc::clone(&keys),
            Arc::clone(&datasets),
            config.key_caching.structured && !config.key_caching.encrypt,
            Duration::from_secs(config.key_caching.ttl_seconds),
        );
        let unstructured = Arc::new(UnstructuredPipeline::new(Arc::clone(&keys)));
        let events = EventAggregator::new(
            Arc::clone(&http),
            creds.host().to_string(),
            config.event_reporting.clone(),
        );

        if config.logging.verbose {
            info!("ubiq client ready against {}", creds.host());
        }

        Self {
            creds,
            datasets,
            structured,
            unstructured,
            events,
            destroy_report_async: config.event_reporting.destroy_report_async,
        }
    }

    /// Encrypts arbitrary bytes under a per-message data key. The result
    /// carries a self-describing header; treat it as opaque.
    pub async fn encrypt(&self, plaintext: &[u8]) -> ClientResult<Vec<u8>> {
        let ciphertext = self.unstructured.encrypt(plaintext).await?;
        self.record(EventAction::Encrypt, "", "", DatasetKind::Unstructured, 0)
            .await?;
        Ok(ciphertext)
    }

    /// Decrypts bytes produced by [`encrypt`](Self::encrypt).
    pub async fn decrypt(&self, ciphertext: &[u8]) -> ClientResult<Vec<u8>> {
        let plaintext = self.unstructured.decrypt(ciphertext).await?;
        self.record(EventAction::Decrypt, "", "", DatasetKind::Unstructured, 0)
            .await?;
        Ok(plaintext)
    }

    /// Format-preserving encryption of `plaintext` under the named
    /// structured dataset.
    pub async fn encrypt_structured(
        &self,
        dataset_name: &str,
        plaintext: &str,
    ) -> ClientResult<String> {
        let (ciphertext, key_number) = self.structured.encrypt(dataset_name, plaintext).await?;
        let group = self.dataset_group(dataset_name).await;
        self.record(
            EventAction::Encrypt,
            dataset_name,
            &group,
            DatasetKind::Structured,
            key_number,
        )
        .await?;
        Ok(ciphertext)
    }

    /// Inverse of [`encrypt_structured`](Self::encrypt_structured).
    pub async fn decrypt_structured(
        &self,
        dataset_name: &str,
        ciphertext: &str,
    ) -> ClientResult<String> {
        let (plaintext, key_number) = self.structured.decrypt(dataset_name, ciphertext).await?;
        let group = self.dataset_group(dataset_name).await;
        self.record(
            EventAction::Decrypt,
            dataset_name,
            &group,
            DatasetKind::Structured,
            key_number,
        )
        .await?;
        Ok(plaintext)
    }

    /// Encrypts under every active key version of the dataset, yielding
    /// the candidate ciphertexts a search index needs.
    pub async fn encrypt_for_search(
        &self,
        dataset_name: &str,
        plaintext: &str,
    ) -> ClientResult<Vec<String>> {
        let results = self
            .structured
            .encrypt_for_search(dataset_name, plaintext)
            .await?;
        let group = self.dataset_group(dataset_name).await;

        let mut ciphertexts = Vec::with_capacity(results.len());
        for (ciphertext, key_number) in results {
            self.record(
                EventAction::Encrypt,
                dataset_name,
                &group,
                DatasetKind::Structured,
                key_number,
            )
            .await?;
            ciphertexts.push(ciphertext);
        }
        Ok(ciphertexts)
    }

    /// Pre-warms dataset definitions and every active key version for the
    /// named datasets.
    pub async fn prime_key_cache(&self, dataset_names: &[String]) -> ClientResult<()> {
        self.structured
            .prime(dataset_names)
            .await?;
        debug!("primed key cache for {} dataset(s)", dataset_names.len());
        Ok(())
    }

    /// Starts a piecewise encryption session (single-shot `update`).
    pub fn encryption_session(&self) -> EncryptSession {
        EncryptSession::new(
            Arc::clone(&self.unstructured),
            self.events.clone(),
            self.creds.papi().to_string(),
        )
    }

    /// Starts a piecewise decryption session (single-shot `update`).
    pub fn decryption_session(&self) -> DecryptSession {
        DecryptSession::new(
            Arc::clone(&self.unstructured),
            self.events.clone(),
            self.creds.papi().to_string(),
        )
    }

    /// Attaches caller metadata to every subsequent usage event.
    pub fn add_user_metadata(&self, json: &str) -> ClientResult<()> {
        self.events.add_user_metadata(json)
    }

    /// Flushes pending usage events. Call before dropping the client for a
    /// deterministic report; honors `destroy_report_async`.
    pub async fn close(&self) -> ClientResult<()> {
        self.events.process(self.destroy_report_async).await
    }

    async fn record(
        &self,
        action: EventAction,
        dataset_name: &str,
        dataset_group: &str,
        dataset_type: DatasetKind,
        key_number: u32,
    ) -> ClientResult<()> {
        self.events
            .add_or_increment(Event::new(
                self.creds.papi(),
                dataset_name,
                dataset_group,
                action,
                dataset_type,
                key_number,
            ))
            .await
    }

    async fn dataset_group(&self, name: &str) -> String {
        match self.datasets.get(name).await {
            Ok(dataset) => dataset.group_name,
            Err(_) => String::new(),
        }
    }
}

impl Drop for UbiqClient {
    // best-effort teardown flush; close() is the deterministic path
    fn drop(&mut self) {
        if self.events.queued_count() == 0 {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let events = self.events.clone();
            handle.spawn(async move {
                let _ = events.process(true).await;
            });
        }
    }
}
