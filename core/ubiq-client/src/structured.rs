//! Structured (format-preserving) encryption pipeline.
//!
//! Wraps the FF1 kernel with everything a dataset dictates: passthrough /
//! prefix / suffix deconstruction, alphabet validation and length bounds,
//! translation from the input to the output character set, and key-number
//! embedding in the first ciphertext character.

use crate::cache::TtlCache;
use crate::datasets::{Dataset, DatasetConfig, DatasetKind, DatasetManager, RuleKind};
use crate::error::{ClientError, ClientResult};
use crate::keys::{DataKey, KeyManager};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use ubiq_crypto::{Alphabet, Ff1};

/// Formatting stripped from an input, to be reapplied to the result.
struct Deconstructed {
    core: Vec<char>,
    prefix: Vec<char>,
    suffix: Vec<char>,
    /// Snapshot of the string at the point the passthrough rule fired;
    /// passthrough members keep their positions, other slots take core
    /// characters on reconstruct.
    mask: Option<Vec<char>>,
}

/// A passthrough rule with the legacy fallback already resolved.
#[derive(Clone, Copy)]
enum Step {
    Prefix(usize),
    Suffix(usize),
    Passthrough,
}

fn effective_steps(config: &DatasetConfig) -> ClientResult<Vec<Step>> {
    let mut steps = Vec::with_capacity(config.passthrough_rules.len() + 1);
    let mut saw_passthrough = false;

    // rules are priority-sorted at dataset load
    for rule in &config.passthrough_rules {
        steps.push(match rule.kind {
            RuleKind::Prefix => Step::Prefix(rule.value.unwrap_or(0) as usize),
            RuleKind::Suffix => Step::Suffix(rule.value.unwrap_or(0) as usize),
            RuleKind::Passthrough => {
                saw_passthrough = true;
                Step::Passthrough
            }
        });
    }

    // legacy datasets predate explicit rules: a bare passthrough set is
    // applied after everything else
    if !saw_passthrough && !config.passthrough.is_empty() {
        steps.push(Step::Passthrough);
    }

    Ok(steps)
}

fn deconstruct(input: &str, config: &DatasetConfig) -> ClientResult<Deconstructed> {
    let passthrough: HashSet<char> = config.passthrough.chars().collect();
    let mut s: Vec<char> = input.chars().collect();
    let mut parts = Deconstructed {
        core: Vec::new(),
        prefix: Vec::new(),
        suffix: Vec::new(),
        mask: None,
    };

    for step in effective_steps(config)? {
        match step {
            Step::Prefix(k) => {
                if s.len() < k {
                    return Err(ClientError::InputInvalid(format!(
                        "input shorter than required prefix of {k}"
                    )));
                }
                let rest = s.split_off(k);
                parts.prefix = std::mem::replace(&mut s, rest);
            }
            Step::Suffix(k) => {
                if s.len() < k {
                    return Err(ClientError::InputInvalid(format!(
                        "input shorter than required suffix of {k}"
                    )));
                }
                parts.suffix = s.split_off(s.len() - k);
            }
            Step::Passthrough => {
                parts.mask = Some(s.clone());
                s.retain(|c| !passthrough.contains(c));
            }
        }
    }

    parts.core = s;
    Ok(parts)
}

fn reconstruct(core: Vec<char>, parts: &Deconstructed, config: &DatasetConfig) -> ClientResult<String> {
    let passthrough: HashSet<char> = config.passthrough.chars().collect();
    let mut s = core;

    for step in effective_steps(config)?.into_iter().rev() {
        match step {
            Step::Passthrough => {
                let mask = parts.mask.as_ref().ok_or_else(|| {
                    ClientError::InputInvalid("passthrough mask missing".to_string())
                })?;
                let mut fill = s.into_iter();
                let mut merged = Vec::with_capacity(mask.len());
                for &mc in mask {
                    if passthrough.contains(&mc) {
                        merged.push(mc);
                    } else {
                        merged.push(fill.next().ok_or_else(|| {
                            ClientError::InputInvalid(
                                "reconstructed text shorter than its mask".to_string(),
                            )
                        })?);
                    }
                }
                s = merged;
            }
            Step::Prefix(_) => {
                let mut merged = parts.prefix.clone();
                merged.append(&mut s);
                s = merged;
            }
            Step::Suffix(_) => {
                s.extend_from_slice(&parts.suffix);
            }
        }
    }

    Ok(s.into_iter().collect())
}

// ── Key-number embedding ──

fn encode_key_number(
    s: &mut [char],
    output: &Alphabet,
    msb_bits: u32,
    key_number: u32,
) -> ClientResult<()> {
    let first = s.first().copied().ok_or_else(|| {
        ClientError::InputInvalid("empty ciphertext cannot carry a key number".to_string())
    })?;
    let i = output.pos(first).ok_or_else(|| {
        ClientError::InputInvalid(format!("character {first:?} not in output character set"))
    })?;

    let shifted = i as usize + ((key_number as usize) << msb_bits);
    let replacement = output.char_at(shifted).ok_or_else(|| {
        ClientError::InputInvalid(format!(
            "key number {key_number} does not fit the output character set"
        ))
    })?;
    s[0] = replacement;
    Ok(())
}

fn decode_key_number(s: &mut [char], output: &Alphabet, msb_bits: u32) -> ClientResult<u32> {
    let first = s.first().copied().ok_or_else(|| {
        ClientError::InputInvalid("empty ciphertext".to_string())
    })?;
    let i = output.pos(first).ok_or_else(|| {
        ClientError::InputInvalid(format!("character {first:?} not in output character set"))
    })?;

    let key_number = i >> msb_bits;
    let base = i - (key_number << msb_bits);
    s[0] = output
        .char_at(base as usize)
        .expect("base index is below the embedded index");
    Ok(key_number)
}

// ── Pipeline ──

/// Runs dataset-driven format-preserving encryption.
pub struct StructuredPipeline {
    keys: Arc<KeyManager>,
    datasets: Arc<DatasetManager>,
    ff1_cache: TtlCache<Arc<Ff1>>,
    /// Memoizing FF1 objects is skipped when cached keys stay wrapped.
    cache_ff1: bool,
    ttl: Duration,
}

impl StructuredPipeline {
    pub fn new(
        keys: Arc<KeyManager>,
        datasets: Arc<DatasetManager>,
        cache_ff1: bool,
        ttl: Duration,
    ) -> Self {
        Self {
            keys,
            datasets,
            ff1_cache: TtlCache::new(),
            cache_ff1,
            ttl,
        }
    }

    /// Encrypts `plaintext` under the dataset's current default key.
    /// Returns the ciphertext and the key number it embeds.
    pub async fn encrypt(&self, dataset_name: &str, plaintext: &str) -> ClientResult<(String, u32)> {
        let dataset = self.structured_dataset(dataset_name).await?;
        let key = self.keys.get_encryption_key(&dataset, false).await?;
        self.encrypt_with_key(&dataset, plaintext, &key).await
    }

    /// Encrypts `plaintext` under every active key version, yielding one
    /// ciphertext per version.
    pub async fn encrypt_for_search(
        &self,
        dataset_name: &str,
        plaintext: &str,
    ) -> ClientResult<Vec<(String, u32)>> {
        let mut all = self
            .keys
            .get_all_encryption_keys(&self.datasets, std::slice::from_ref(&dataset_name.to_string()))
            .await?;
        let keys = all.remove(dataset_name).ok_or_else(|| {
            ClientError::Dataset(format!("no keys returned for dataset {dataset_name:?}"))
        })?;
        let dataset = self.structured_dataset(dataset_name).await?;

        let mut out = Vec::with_capacity(keys.len());
        for key in &keys {
            out.push(self.encrypt_with_key(&dataset, plaintext, key).await?);
        }
        Ok(out)
    }

    /// Pre-warms the caches: dataset definitions plus every active key
    /// version for the named datasets.
    pub async fn prime(&self, dataset_names: &[String]) -> ClientResult<()> {
        self.keys
            .get_all_encryption_keys(&self.datasets, dataset_names)
            .await?;
        Ok(())
    }

    /// Decrypts a ciphertext, fetching the key version its first character
    /// names. Returns the plaintext and that key number.
    pub async fn decrypt(&self, dataset_name: &str, ciphertext: &str) -> ClientResult<(String, u32)> {
        let dataset = self.structured_dataset(dataset_name).await?;
        let config = dataset.structured_config()?;
        let input = Alphabet::new(&config.input_character_set)?;
        let output = Alphabet::new(&config.output_character_set)?;

        let parts = deconstruct(ciphertext, config)?;
        let mut core = parts.core.clone();
        self.check_length(config, core.len())?;

        let key_number = decode_key_number(&mut core, &output, config.msb_encoding_bits)?;
        let translated =
            ubiq_crypto::numeral::convert_radix(&core, &output, &input, core.len())?;

        let key = self
            .keys
            .get_decryption_key_structured(&dataset, key_number)
            .await?;
        let ff1 = self.ff1_for(&dataset, &key, config).await?;

        let pt_core = ff1.decrypt(&translated.iter().collect::<String>())?;
        let text = reconstruct(pt_core.chars().collect(), &parts, config)?;
        Ok((text, key_number))
    }

    async fn encrypt_with_key(
        &self,
        dataset: &Dataset,
        plaintext: &str,
        key: &DataKey,
    ) -> ClientResult<(String, u32)> {
        let config = dataset.structured_config()?;
        let input = Alphabet::new(&config.input_character_set)?;
        let output = Alphabet::new(&config.output_character_set)?;
        let key_number = key.key_number.ok_or_else(|| {
            ClientError::Dataset("structured key is missing its key number".to_string())
        })?;

        let parts = deconstruct(plaintext, config)?;
        for &c in &parts.core {
            if !input.contains(c) {
                return Err(ClientError::InputInvalid(format!(
                    "character {c:?} not in the dataset's input character set"
                )));
            }
        }
        self.check_length(config, parts.core.len())?;

        let ff1 = self.ff1_for(dataset, key, config).await?;
        let ct_core = ff1.encrypt(&parts.core.iter().collect::<String>())?;

        let mut translated = ubiq_crypto::numeral::convert_radix(
            &ct_core.chars().collect::<Vec<_>>(),
            &input,
            &output,
            ct_core.chars().count(),
        )?;
        encode_key_number(&mut translated, &output, config.msb_encoding_bits, key_number)?;

        let text = reconstruct(translated, &parts, config)?;
        Ok((text, key_number))
    }

    fn check_length(&self, config: &DatasetConfig, len: usize) -> ClientResult<()> {
        if len < config.min_input_length || len > config.max_input_length {
            return Err(ClientError::InputInvalid(format!(
                "encryptable length {len} outside [{}, {}]",
                config.min_input_length, config.max_input_length
            )));
        }
        Ok(())
    }

    /// Cached FF1 lookup for decrypt (async because the cache is shared).
    async fn ff1_for(
        &self,
        dataset: &Dataset,
        key: &DataKey,
        config: &DatasetConfig,
    ) -> ClientResult<Arc<Ff1>> {
        let key_number = key.key_number.unwrap_or(0);
        let cache_key = format!("{}-ff1-{key_number}", dataset.name);

        if self.cache_ff1 {
            if let Some(ff1) = self.ff1_cache.get(&cache_key).await {
                return Ok(ff1);
            }
        }

        let ff1 = Arc::new(self.build_ff1(key, config)?);
        if self.cache_ff1 {
            self.ff1_cache
                .set(cache_key, Arc::clone(&ff1), Some(self.ttl))
                .await;
        }
        Ok(ff1)
    }

    fn build_ff1(&self, key: &DataKey, config: &DatasetConfig) -> ClientResult<Ff1> {
        let tweak = B64.decode(&config.tweak).map_err(|e| {
            ClientError::InputInvalid(format!("dataset tweak is not valid base64: {e}"))
        })?;
        Ok(Ff1::new(&key.raw, tweak, &config.input_character_set)?)
    }

    async fn structured_dataset(&self, name: &str) -> ClientResult<Dataset> {
        let dataset = self.datasets.get(name).await?;
        if dataset.kind != DatasetKind::Structured {
            return Err(ClientError::Dataset(format!(
                "dataset {name:?} is not defined for structured encryption"
            )));
        }
        Ok(dataset)
    }
}
