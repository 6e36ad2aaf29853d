//! Dataset definitions and their manager.
//!
//! A dataset names a field type and, for structured (format-preserving)
//! encryption, carries the alphabets, tweak, length bounds and passthrough
//! rules that drive the pipeline. The KMS answers a dataset lookup either
//! with a definition (structured) or with its "Invalid Dataset name"
//! sentinel, which marks the name as unstructured.

use crate::cache::TtlCache;
use crate::credentials::Credentials;
use crate::error::{ClientError, ClientResult};
use crate::http::SignedClient;
use reqwest::Url;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

/// Sentinel message the KMS uses to signal that a name has no structured
/// definition.
const INVALID_DATASET_SENTINEL: &str = "Invalid Dataset name";

/// Protection mode of a dataset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DatasetKind {
    Structured,
    Unstructured,
}

impl DatasetKind {
    /// Wire rendering used in usage events.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Structured => "structured",
            Self::Unstructured => "unstructured",
        }
    }
}

/// A named dataset; `config` is present exactly for structured datasets.
#[derive(Clone, Debug)]
pub struct Dataset {
    pub name: String,
    pub group_name: String,
    pub kind: DatasetKind,
    pub config: Option<DatasetConfig>,
}

impl Dataset {
    pub fn unstructured(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group_name: String::new(),
            kind: DatasetKind::Unstructured,
            config: None,
        }
    }

    /// The structured configuration, or a dataset error for operations
    /// that require one.
    pub fn structured_config(&self) -> ClientResult<&DatasetConfig> {
        self.config.as_ref().ok_or_else(|| {
            ClientError::Dataset(format!(
                "dataset {:?} has no structured definition",
                self.name
            ))
        })
    }
}

/// Structured dataset configuration as served by the KMS.
#[derive(Clone, Debug, Deserialize)]
pub struct DatasetConfig {
    pub input_character_set: String,
    pub output_character_set: String,
    #[serde(default)]
    pub passthrough: String,
    #[serde(default)]
    pub passthrough_rules: Vec<PassthroughRule>,
    /// Base64-encoded FF1 tweak.
    #[serde(default)]
    pub tweak: String,
    pub min_input_length: usize,
    pub max_input_length: usize,
    /// High bits of the first output character reserved for the key number.
    #[serde(default)]
    pub msb_encoding_bits: u32,
}

/// One formatting rule, applied in `priority` order on deconstruct and in
/// reverse order on reconstruct.
#[derive(Clone, Debug, Deserialize)]
pub struct PassthroughRule {
    #[serde(rename = "type")]
    pub kind: RuleKind,
    /// Prefix/suffix length; unused for passthrough rules.
    #[serde(default)]
    pub value: Option<u64>,
    pub priority: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    Prefix,
    Suffix,
    Passthrough,
}

/// Dataset JSON as it appears on the wire (`/api/v0/ffs` and the `ffs`
/// member of `def_keys` responses).
#[derive(Deserialize)]
struct DatasetWire {
    name: String,
    #[serde(default, alias = "ffs_group")]
    group_name: String,
    #[serde(flatten)]
    config: DatasetConfig,
}

/// Error body of a rejected dataset lookup.
#[derive(Deserialize)]
struct KmsErrorBody {
    #[serde(default)]
    message: String,
}

pub(crate) fn dataset_from_wire(value: serde_json::Value) -> ClientResult<Dataset> {
    let wire: DatasetWire = serde_json::from_value(value)?;
    let mut config = wire.config;

    // the two character sets are same-cardinality alphabets; ciphertext is
    // rendered over the output set at the input string's exact length
    if config.output_character_set.chars().count() != config.input_character_set.chars().count()
    {
        return Err(ClientError::Dataset(format!(
            "dataset {:?}: input and output character sets differ in size",
            wire.name
        )));
    }

    config.passthrough_rules.sort_by_key(|r| r.priority);

    Ok(Dataset {
        name: wire.name,
        group_name: wire.group_name,
        kind: DatasetKind::Structured,
        config: Some(config),
    })
}

/// Fetches and caches dataset definitions.
pub struct DatasetManager {
    http: Arc<SignedClient>,
    creds: Credentials,
    cache: TtlCache<Dataset>,
    caching_enabled: bool,
}

impl DatasetManager {
    pub fn new(http: Arc<SignedClient>, creds: Credentials, caching_enabled: bool) -> Self {
        Self {
            http,
            creds,
            cache: TtlCache::new(),
            caching_enabled,
        }
    }

    /// Resolves a dataset by name. An empty name is implicitly
    /// unstructured; a name the server rejects with its sentinel is
    /// remembered as unstructured.
    pub async fn get(&self, name: &str) -> ClientResult<Dataset> {
        if name.is_empty() {
            return Ok(Dataset::unstructured(""));
        }

        if self.caching_enabled {
            if let Some(dataset) = self.cache.get(name).await {
                return Ok(dataset);
            }
        }

        let url = Url::parse_with_params(
            &format!("{}/api/v0/ffs", self.creds.host()),
            &[("ffs_name", name), ("papi", self.creds.papi())],
        )
        .map_err(|e| ClientError::Dataset(format!("bad dataset URL: {e}")))?;

        let resp = self.http.get(url.as_str()).await?;
        let dataset = if resp.success {
            dataset_from_wire(serde_json::from_str(&resp.content)?)?
        } else {
            let body: KmsErrorBody = serde_json::from_str(&resp.content).unwrap_or(KmsErrorBody {
                message: String::new(),
            });
            if body.message.contains(INVALID_DATASET_SENTINEL) {
                debug!("dataset {name} has no definition, treating as unstructured");
                Dataset::unstructured(name)
            } else {
                return Err(ClientError::kms(resp.status, body.message));
            }
        };

        if self.caching_enabled {
            self.cache.set(name, dataset.clone(), None).await;
        }
        Ok(dataset)
    }

    /// Deposits a definition fetched elsewhere (the `def_keys` byproduct).
    pub(crate) async fn put(&self, dataset: Dataset) {
        if self.caching_enabled {
            self.cache.set(dataset.name.clone(), dataset, None).await;
        }
    }

    pub async fn clear(&self) {
        self.cache.clear().await;
    }
}
