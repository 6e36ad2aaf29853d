//! Shared fixtures for integration tests against a mock KMS.
//!
//! Builds the artifacts the real server issues: an RSA private key as an
//! `srsa`-encrypted PKCS#8 PEM and data keys OAEP-wrapped under the public
//! half. Key generation is expensive, so one keypair is shared per test
//! binary.

#![allow(dead_code)]

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use pkcs8::{EncodePrivateKey, LineEnding};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use std::sync::OnceLock;
use ubiq_client::{Configuration, Credentials};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const PAPI: &str = "test-access-key-id";
pub const SAPI: &str = "test-secret-signing-key";
pub const SRSA: &str = "test-secret-crypto-access-key";

pub const DIGITS: &str = "0123456789";

pub fn keypair() -> &'static (RsaPrivateKey, RsaPublicKey) {
    static KEYS: OnceLock<(RsaPrivateKey, RsaPublicKey)> = OnceLock::new();
    KEYS.get_or_init(|| {
        let private = RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap();
        let public = RsaPublicKey::from(&private);
        (private, public)
    })
}

/// The private key as the KMS ships it: PKCS#8 PEM encrypted with `srsa`.
pub fn encrypted_private_key_pem() -> &'static str {
    static PEM: OnceLock<String> = OnceLock::new();
    PEM.get_or_init(|| {
        keypair()
            .0
            .to_pkcs8_encrypted_pem(&mut rand::rngs::OsRng, SRSA, LineEnding::LF)
            .unwrap()
            .to_string()
    })
}

/// OAEP-wraps a data key under the fixture public key, base64-encoded.
pub fn wrap_key(data_key: &[u8]) -> String {
    let wrapped = keypair()
        .1
        .encrypt(&mut rand::rngs::OsRng, Oaep::new::<sha1::Sha1>(), data_key)
        .unwrap();
    B64.encode(wrapped)
}

/// Deterministic 32-byte data key; `salt` varies it per key version.
pub fn data_key(salt: u8) -> Vec<u8> {
    (0u8..32).map(|i| i.wrapping_mul(7) ^ salt).collect()
}

pub fn credentials(server: &MockServer) -> Credentials {
    Credentials::new(PAPI, SAPI, SRSA, Some(server.uri())).unwrap()
}

/// Configuration with reporting thresholds high enough that tests control
/// every flush explicitly.
pub fn test_config() -> Configuration {
    let mut config = Configuration::default();
    config.event_reporting.minimum_count = 1000;
    config.event_reporting.flush_interval = 3600;
    config
}

/// Opaque blob standing in for the server's encrypted data key.
pub fn edk_b64() -> String {
    B64.encode(b"edk-blob-0001")
}

// ── Endpoint mounts ──

pub async fn mount_tracking(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/v3/tracking/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "ok"})))
        .mount(server)
        .await;
}

/// `POST /api/v0/encryption/key` issuing a fresh unstructured key.
pub async fn mount_encryption_key(server: &MockServer, key: &[u8]) {
    Mock::given(method("POST"))
        .and(path("/api/v0/encryption/key"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "encrypted_private_key": encrypted_private_key_pem(),
            "encrypted_data_key": edk_b64(),
            "wrapped_data_key": wrap_key(key),
            "encryption_session": "session-1",
            "key_fingerprint": "fp-1",
            "security_model": {
                "algorithm": "aes-256-gcm",
                "enable_data_fragmentation": false
            }
        })))
        .mount(server)
        .await;
}

/// `POST /api/v0/decryption/key` resolving the fixture EDK.
pub async fn mount_decryption_key(server: &MockServer, key: &[u8]) {
    Mock::given(method("POST"))
        .and(path("/api/v0/decryption/key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "encrypted_private_key": encrypted_private_key_pem(),
            "wrapped_data_key": wrap_key(key),
            "encryption_session": "session-1",
            "key_fingerprint": "fp-1"
        })))
        .mount(server)
        .await;

    // fire-and-forget usage callback; accept and ignore
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

/// A social-security-number-shaped structured dataset: digits in and out
/// (the sets must match in size), dashes passed through. `msb_encoding_bits`
/// is 4 so every digit index shifts out to key number 0 on decode.
pub fn ssn_dataset_json() -> serde_json::Value {
    serde_json::json!({
        "name": "SSN",
        "ffs_group": "pii",
        "input_character_set": DIGITS,
        "output_character_set": DIGITS,
        "passthrough": "-",
        "passthrough_rules": [],
        "tweak": B64.encode(b"ssn-tweak"),
        "min_input_length": 9,
        "max_input_length": 9,
        "msb_encoding_bits": 4
    })
}

pub async fn mount_ffs(server: &MockServer, dataset: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/api/v0/ffs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(dataset))
        .mount(server)
        .await;
}

/// `GET /api/v0/fpe/key` for one key version. When `match_key_number` is
/// false the mock serves the "current key" request (no `key_number`
/// parameter).
pub async fn mount_fpe_key(
    server: &MockServer,
    key_number: u32,
    key: &[u8],
    match_key_number: bool,
) {
    let mock = Mock::given(method("GET")).and(path("/api/v0/fpe/key"));
    let mock = if match_key_number {
        mock.and(wiremock::matchers::query_param(
            "key_number",
            key_number.to_string(),
        ))
    } else {
        mock.and(wiremock::matchers::query_param_is_missing("key_number"))
    };
    mock.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "key_number": key_number,
        "encrypted_private_key": encrypted_private_key_pem(),
        "wrapped_data_key": wrap_key(key),
    })))
    .mount(server)
    .await;
}

/// `GET /api/v0/fpe/def_keys` advertising the given key versions.
pub async fn mount_def_keys(server: &MockServer, dataset: serde_json::Value, versions: &[u32]) {
    let name = dataset["name"].as_str().unwrap().to_string();
    let keys: serde_json::Map<String, serde_json::Value> = versions
        .iter()
        .map(|&n| (n.to_string(), serde_json::Value::String(wrap_key(&data_key(n as u8)))))
        .collect();

    let mut body = serde_json::Map::new();
    body.insert(
        name,
        serde_json::json!({
            "ffs": dataset,
            "encrypted_private_key": encrypted_private_key_pem(),
            "keys": keys,
        }),
    );

    Mock::given(method("GET"))
        .and(path("/api/v0/fpe/def_keys"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::Value::Object(body)))
        .mount(server)
        .await;
}
