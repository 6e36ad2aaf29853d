//! Data-key lifecycle: fetch, unwrap, cache.
//!
//! Every key the KMS issues arrives wrapped: the response carries an RSA
//! private key as an `srsa`-encrypted PEM and the data key OAEP-wrapped
//! under the matching public key. The manager unwraps at cache time by
//! default; with `key_caching.encrypt` the cache keeps the wrapped form and
//! pays an unwrap on every use.
//!
//! Cache layout: entries live under `<dataset>-keys-<fingerprint>` where the
//! fingerprint is the MD5 of the base64 encrypted data key (unstructured) or
//! of the decimal key number (structured). A sibling
//! `<dataset>-keys-default` alias names the entry new encryptions should
//! use, amortizing fetches across calls.

use crate::algorithm::Algorithm;
use crate::cache::TtlCache;
use crate::config::KeyCachingConfig;
use crate::credentials::Credentials;
use crate::datasets::{dataset_from_wire, Dataset, DatasetKind, DatasetManager};
use crate::error::{ClientError, ClientResult};
use crate::http::SignedClient;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use md5::{Digest, Md5};
use reqwest::Url;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const JSON: &str = "application/json";

/// A usable (unwrapped) data key handed to the pipelines.
#[derive(Clone, Debug)]
pub struct DataKey {
    /// Plaintext key bytes.
    pub raw: Vec<u8>,
    /// Key version for structured datasets.
    pub key_number: Option<u32>,
    /// Opaque server-issued blob embedded in unstructured headers.
    pub encrypted_data_key: Vec<u8>,
    pub algorithm: Option<Algorithm>,
    pub fingerprint: Option<String>,
    pub session: Option<String>,
    pub fragmentation: bool,
}

/// How the raw key sits in the cache.
#[derive(Clone)]
enum KeyMaterial {
    Plain(Vec<u8>),
    /// Still RSA-OAEP-wrapped; unwrapped on every resolve.
    Wrapped(Vec<u8>),
}

/// A cache entry: everything needed to reconstruct a [`DataKey`].
#[derive(Clone)]
struct CachedKey {
    key_number: Option<u32>,
    encrypted_data_key: Vec<u8>,
    encrypted_private_key: String,
    material: KeyMaterial,
    algorithm: Option<Algorithm>,
    fingerprint: Option<String>,
    session: Option<String>,
    fragmentation: bool,
}

// ── Wire types ──

#[derive(Deserialize)]
struct NewKeyResponse {
    encrypted_private_key: String,
    /// Base64; round-trips into unstructured ciphertext headers.
    encrypted_data_key: String,
    wrapped_data_key: String,
    #[serde(default)]
    encryption_session: Option<String>,
    #[serde(default)]
    key_fingerprint: Option<String>,
    #[serde(default)]
    security_model: Option<SecurityModel>,
}

#[derive(Deserialize)]
struct SecurityModel {
    algorithm: String,
    #[serde(default)]
    enable_data_fragmentation: bool,
}

#[derive(Deserialize)]
struct DecryptKeyResponse {
    encrypted_private_key: String,
    wrapped_data_key: String,
    #[serde(default)]
    encryption_session: Option<String>,
    #[serde(default)]
    key_fingerprint: Option<String>,
}

#[derive(Deserialize)]
struct FpeKeyResponse {
    #[serde(deserialize_with = "deserialize_u32_from_str_or_num")]
    key_number: u32,
    encrypted_private_key: String,
    wrapped_data_key: String,
}

#[derive(Deserialize)]
struct DefKeysEntry {
    ffs: serde_json::Value,
    encrypted_private_key: String,
    /// Key number (decimal string) to base64 wrapped key.
    keys: HashMap<String, String>,
}

/// Accepts a JSON number or a string-encoded number (the server is not
/// consistent about key numbers).
fn deserialize_u32_from_str_or_num<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de;

    struct U32Visitor;
    impl de::Visitor<'_> for U32Visitor {
        type Value = u32;
        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("a number or string-encoded number")
        }
        fn visit_u64<E: de::Error>(self, v: u64) -> Result<u32, E> {
            u32::try_from(v).map_err(de::Error::custom)
        }
        fn visit_i64<E: de::Error>(self, v: i64) -> Result<u32, E> {
            u32::try_from(v).map_err(de::Error::custom)
        }
        fn visit_str<E: de::Error>(self, v: &str) -> Result<u32, E> {
            v.parse().map_err(de::Error::custom)
        }
    }
    deserializer.deserialize_any(U32Visitor)
}

// ── Manager ──

/// Fetches, unwraps and caches data keys for both protection modes.
pub struct KeyManager {
    http: Arc<SignedClient>,
    creds: Credentials,
    cfg: KeyCachingConfig,
    cache: TtlCache<CachedKey>,
}

impl KeyManager {
    pub fn new(http: Arc<SignedClient>, creds: Credentials, cfg: KeyCachingConfig) -> Self {
        Self {
            http,
            creds,
            cfg,
            cache: TtlCache::new(),
        }
    }

    fn ttl(&self) -> Option<Duration> {
        Some(Duration::from_secs(self.cfg.ttl_seconds))
    }

    fn caching_enabled(&self, kind: DatasetKind) -> bool {
        match kind {
            DatasetKind::Structured => self.cfg.structured,
            DatasetKind::Unstructured => self.cfg.unstructured,
        }
    }

    /// Gets a key for a new encryption. Unless `no_cache`, the dataset's
    /// default alias is consulted first and refreshed afterwards.
    pub async fn get_encryption_key(
        &self,
        dataset: &Dataset,
        no_cache: bool,
    ) -> ClientResult<DataKey> {
        let caching = self.caching_enabled(dataset.kind);
        let default_key = cache_name(&dataset.name, "default");

        if caching && !no_cache {
            if let Some(entry) = self.cache.get(&default_key).await {
                return self.resolve(&entry);
            }
        }

        let entry = match dataset.kind {
            DatasetKind::Unstructured => self.fetch_new_unstructured_key().await?,
            DatasetKind::Structured => self.fetch_fpe_key(&dataset.name, None).await?,
        };

        if caching {
            let fingerprint = self.entry_fingerprint(&entry);
            let name = cache_name(&dataset.name, &fingerprint);
            self.cache.set(name.clone(), entry.clone(), self.ttl()).await;
            if !no_cache {
                self.cache.copy(&name, &default_key, self.ttl()).await;
            }
        }

        self.resolve(&entry)
    }

    /// Gets the key an unstructured ciphertext header points at, probing
    /// the cache by the MD5 of the base64 encrypted data key.
    pub async fn get_decryption_key_unstructured(&self, edk: &[u8]) -> ClientResult<DataKey> {
        let edk_b64 = B64.encode(edk);
        let fingerprint = md5_hex(edk_b64.as_bytes());
        let caching = self.cfg.unstructured;
        let name = cache_name("", &fingerprint);

        if caching {
            if let Some(entry) = self.cache.get(&name).await {
                return self.resolve(&entry);
            }
        }

        let url = format!("{}/api/v0/decryption/key", self.creds.host());
        let body = serde_json::json!({ "encrypted_data_key": edk_b64 }).to_string();
        let resp = self.http.post(&url, body, JSON).await?;
        if !resp.success {
            return Err(ClientError::kms(resp.status, resp.content));
        }
        let wire: DecryptKeyResponse = resp.json()?;

        // optional usage callback; no response dependence
        if let (Some(fp), Some(session)) = (&wire.key_fingerprint, &wire.encryption_session) {
            let url = format!(
                "{}/api/v0/decryption/key/{fp}/{session}",
                self.creds.host()
            );
            self.http
                .patch_async(&url, serde_json::json!({ "uses": 1 }).to_string(), JSON);
        }

        let entry = self.build_entry(
            None,
            edk.to_vec(),
            wire.encrypted_private_key,
            &wire.wrapped_data_key,
            None,
            wire.key_fingerprint,
            wire.encryption_session,
            false,
        )?;

        if caching {
            self.cache.set(name, entry.clone(), self.ttl()).await;
        }
        self.resolve(&entry)
    }

    /// Gets a structured key by version, probing the cache by the MD5 of
    /// the decimal key number.
    pub async fn get_decryption_key_structured(
        &self,
        dataset: &Dataset,
        key_number: u32,
    ) -> ClientResult<DataKey> {
        let caching = self.cfg.structured;
        let name = cache_name(&dataset.name, &md5_hex(key_number.to_string().as_bytes()));

        if caching {
            if let Some(entry) = self.cache.get(&name).await {
                return self.resolve(&entry);
            }
        }

        let entry = self.fetch_fpe_key(&dataset.name, Some(key_number)).await?;
        if caching {
            self.cache.set(name, entry.clone(), self.ttl()).await;
        }
        self.resolve(&entry)
    }

    /// Bulk-fetches every active key version for the named datasets,
    /// caching keys and (as a byproduct) dataset definitions. Returns the
    /// unwrapped keys per dataset, sorted by key number.
    pub async fn get_all_encryption_keys(
        &self,
        datasets: &DatasetManager,
        names: &[String],
    ) -> ClientResult<HashMap<String, Vec<DataKey>>> {
        let url = Url::parse_with_params(
            &format!("{}/api/v0/fpe/def_keys", self.creds.host()),
            &[
                ("ffs_name", names.join(",").as_str()),
                ("papi", self.creds.papi()),
            ],
        )
        .map_err(|e| ClientError::InputInvalid(format!("bad def_keys URL: {e}")))?;

        let resp = self.http.get(url.as_str()).await?;
        if !resp.success {
            return Err(ClientError::kms(resp.status, resp.content));
        }
        let wire: HashMap<String, DefKeysEntry> = resp.json()?;

        let mut out = HashMap::with_capacity(wire.len());
        for (dataset_name, entry) in wire {
            let dataset = dataset_from_wire(entry.ffs)?;
            datasets.put(dataset.clone()).await;

            let mut keys = Vec::with_capacity(entry.keys.len());
            for (number, wrapped_b64) in &entry.keys {
                let key_number: u32 = number.parse().map_err(|_| {
                    ClientError::Kms {
                        status: 200,
                        message: format!("non-numeric key number {number:?} in def_keys"),
                    }
                })?;

                let cached = self.build_entry(
                    Some(key_number),
                    Vec::new(),
                    entry.encrypted_private_key.clone(),
                    wrapped_b64,
                    None,
                    None,
                    None,
                    false,
                )?;

                if self.cfg.structured {
                    let name = cache_name(
                        &dataset_name,
                        &md5_hex(key_number.to_string().as_bytes()),
                    );
                    self.cache.set(name, cached.clone(), self.ttl()).await;
                }
                keys.push(self.resolve(&cached)?);
            }
            keys.sort_by_key(|k| k.key_number);
            debug!(
                "primed {} key version(s) for dataset {dataset_name}",
                keys.len()
            );
            out.insert(dataset_name, keys);
        }
        Ok(out)
    }

    pub async fn clear(&self) {
        self.cache.clear().await;
    }

    // ── Fetch + unwrap plumbing ──

    async fn fetch_new_unstructured_key(&self) -> ClientResult<CachedKey> {
        let url = format!("{}/api/v0/encryption/key", self.creds.host());
        let body = serde_json::json!({ "uses": 1 }).to_string();
        let resp = self.http.post(&url, body, JSON).await?;
        if !resp.success {
            return Err(ClientError::kms(resp.status, resp.content));
        }
        let wire: NewKeyResponse = resp.json()?;

        let edk = B64
            .decode(&wire.encrypted_data_key)
            .map_err(|e| ClientError::kms(resp.status, format!("bad encrypted_data_key: {e}")))?;
        let (algorithm, fragmentation) = match &wire.security_model {
            Some(m) => (
                Some(Algorithm::from_name(&m.algorithm)?),
                m.enable_data_fragmentation,
            ),
            None => (Some(Algorithm::Aes256Gcm), false),
        };

        self.build_entry(
            None,
            edk,
            wire.encrypted_private_key,
            &wire.wrapped_data_key,
            algorithm,
            wire.key_fingerprint,
            wire.encryption_session,
            fragmentation,
        )
    }

    async fn fetch_fpe_key(
        &self,
        dataset_name: &str,
        key_number: Option<u32>,
    ) -> ClientResult<CachedKey> {
        let mut params: Vec<(&str, String)> = vec![
            ("ffs_name", dataset_name.to_string()),
            ("papi", self.creds.papi().to_string()),
        ];
        if let Some(n) = key_number {
            params.push(("key_number", n.to_string()));
        }
        let url = Url::parse_with_params(
            &format!("{}/api/v0/fpe/key", self.creds.host()),
            &params,
        )
        .map_err(|e| ClientError::InputInvalid(format!("bad fpe key URL: {e}")))?;

        let resp = self.http.get(url.as_str()).await?;
        if !resp.success {
            return Err(ClientError::kms(resp.status, resp.content));
        }
        let wire: FpeKeyResponse = resp.json()?;

        self.build_entry(
            Some(wire.key_number),
            Vec::new(),
            wire.encrypted_private_key,
            &wire.wrapped_data_key,
            None,
            None,
            None,
            false,
        )
    }

    /// Builds a cache entry, unwrapping now unless at-rest encryption of
    /// cached keys is configured.
    #[allow(clippy::too_many_arguments)]
    fn build_entry(
        &self,
        key_number: Option<u32>,
        encrypted_data_key: Vec<u8>,
        encrypted_private_key: String,
        wrapped_data_key_b64: &str,
        algorithm: Option<Algorithm>,
        fingerprint: Option<String>,
        session: Option<String>,
        fragmentation: bool,
    ) -> ClientResult<CachedKey> {
        let wrapped = B64.decode(wrapped_data_key_b64).map_err(|e| {
            ClientError::Crypto(ubiq_crypto::CryptoError::Unwrap(format!(
                "wrapped data key is not valid base64: {e}"
            )))
        })?;

        let material = if self.cfg.encrypt {
            KeyMaterial::Wrapped(wrapped)
        } else {
            let raw = ubiq_crypto::unwrap::unwrap_with_passphrase(
                &encrypted_private_key,
                self.creds.srsa(),
                &wrapped,
            )?;
            KeyMaterial::Plain(raw.to_vec())
        };

        Ok(CachedKey {
            key_number,
            encrypted_data_key,
            encrypted_private_key,
            material,
            algorithm,
            fingerprint,
            session,
            fragmentation,
        })
    }

    /// Produces the plaintext [`DataKey`] for an entry, unwrapping wrapped
    /// material on the fly.
    fn resolve(&self, entry: &CachedKey) -> ClientResult<DataKey> {
        let raw = match &entry.material {
            KeyMaterial::Plain(raw) => raw.clone(),
            KeyMaterial::Wrapped(wrapped) => ubiq_crypto::unwrap::unwrap_with_passphrase(
                &entry.encrypted_private_key,
                self.creds.srsa(),
                wrapped,
            )?
            .to_vec(),
        };

        Ok(DataKey {
            raw,
            key_number: entry.key_number,
            encrypted_data_key: entry.encrypted_data_key.clone(),
            algorithm: entry.algorithm,
            fingerprint: entry.fingerprint.clone(),
            session: entry.session.clone(),
            fragmentation: entry.fragmentation,
        })
    }

    fn entry_fingerprint(&self, entry: &CachedKey) -> String {
        match entry.key_number {
            Some(n) => md5_hex(n.to_string().as_bytes()),
            None => md5_hex(B64.encode(&entry.encrypted_data_key).as_bytes()),
        }
    }
}

fn cache_name(dataset: &str, fingerprint: &str) -> String {
    format!("{dataset}-keys-{fingerprint}")
}

fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}
