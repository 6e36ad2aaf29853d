//! Key manager caching and fetch behavior.

mod support;

use std::sync::Arc;
use support::*;
use ubiq_client::config::KeyCachingConfig;
use ubiq_client::datasets::{Dataset, DatasetManager};
use ubiq_client::http::SignedClient;
use ubiq_client::keys::KeyManager;
use ubiq_client::ClientError;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn manager(server: &MockServer, cfg: KeyCachingConfig) -> KeyManager {
    let creds = credentials(server);
    let http = Arc::new(SignedClient::new(&creds));
    KeyManager::new(http, creds, cfg)
}

#[tokio::test]
async fn default_alias_amortizes_fetches() {
    let server = MockServer::start().await;
    let key = data_key(0);

    Mock::given(method("POST"))
        .and(path("/api/v0/encryption/key"))
        .and(body_json(serde_json::json!({ "uses": 1 })))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "encrypted_private_key": encrypted_private_key_pem(),
            "encrypted_data_key": edk_b64(),
            "wrapped_data_key": wrap_key(&key),
            "security_model": { "algorithm": "aes-256-gcm" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let keys = manager(&server, KeyCachingConfig::default());
    let dataset = Dataset::unstructured("");

    let first = keys.get_encryption_key(&dataset, false).await.unwrap();
    let second = keys.get_encryption_key(&dataset, false).await.unwrap();
    assert_eq!(first.raw, key);
    assert_eq!(second.raw, key);
}

#[tokio::test]
async fn no_cache_bypasses_default_alias() {
    let server = MockServer::start().await;
    let key = data_key(0);

    Mock::given(method("POST"))
        .and(path("/api/v0/encryption/key"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "encrypted_private_key": encrypted_private_key_pem(),
            "encrypted_data_key": edk_b64(),
            "wrapped_data_key": wrap_key(&key),
            "security_model": { "algorithm": "aes-256-gcm" }
        })))
        .expect(2)
        .mount(&server)
        .await;

    let keys = manager(&server, KeyCachingConfig::default());
    let dataset = Dataset::unstructured("");

    keys.get_encryption_key(&dataset, true).await.unwrap();
    keys.get_encryption_key(&dataset, true).await.unwrap();
}

#[tokio::test]
async fn caching_disabled_fetches_every_time() {
    let server = MockServer::start().await;
    let key = data_key(0);

    Mock::given(method("POST"))
        .and(path("/api/v0/encryption/key"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "encrypted_private_key": encrypted_private_key_pem(),
            "encrypted_data_key": edk_b64(),
            "wrapped_data_key": wrap_key(&key),
            "security_model": { "algorithm": "aes-256-gcm" }
        })))
        .expect(2)
        .mount(&server)
        .await;

    let cfg = KeyCachingConfig {
        unstructured: false,
        ..KeyCachingConfig::default()
    };
    let keys = manager(&server, cfg);
    let dataset = Dataset::unstructured("");

    keys.get_encryption_key(&dataset, false).await.unwrap();
    keys.get_encryption_key(&dataset, false).await.unwrap();
}

#[tokio::test]
async fn decryption_key_cached_by_edk_fingerprint() {
    let server = MockServer::start().await;
    let key = data_key(3);

    Mock::given(method("POST"))
        .and(path("/api/v0/decryption/key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "encrypted_private_key": encrypted_private_key_pem(),
            "wrapped_data_key": wrap_key(&key),
            "encryption_session": "session-9",
            "key_fingerprint": "fp-9"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let keys = manager(&server, KeyCachingConfig::default());

    let first = keys
        .get_decryption_key_unstructured(b"edk-blob-0001")
        .await
        .unwrap();
    let second = keys
        .get_decryption_key_unstructured(b"edk-blob-0001")
        .await
        .unwrap();
    assert_eq!(first.raw, key);
    assert_eq!(second.raw, key);
    assert_eq!(first.fingerprint.as_deref(), Some("fp-9"));
}

#[tokio::test]
async fn wrapped_cache_mode_returns_plaintext_keys() {
    let server = MockServer::start().await;
    let key = data_key(5);
    mount_encryption_key(&server, &key).await;

    let cfg = KeyCachingConfig {
        encrypt: true,
        ..KeyCachingConfig::default()
    };
    let keys = manager(&server, cfg);
    let dataset = Dataset::unstructured("");

    // both the fetch and the cache hit must unwrap to the same raw key
    let first = keys.get_encryption_key(&dataset, false).await.unwrap();
    let second = keys.get_encryption_key(&dataset, false).await.unwrap();
    assert_eq!(first.raw, key);
    assert_eq!(second.raw, key);
}

#[tokio::test]
async fn kms_rejection_surfaces_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v0/encryption/key"))
        .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
            "status": 403, "message": "forbidden"
        })))
        .mount(&server)
        .await;

    let keys = manager(&server, KeyCachingConfig::default());
    let err = keys
        .get_encryption_key(&Dataset::unstructured(""), false)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Kms { status: 403, .. }));
}

#[tokio::test]
async fn bad_srsa_fails_unwrap() {
    let server = MockServer::start().await;
    let key = data_key(0);
    mount_encryption_key(&server, &key).await;

    let creds =
        ubiq_client::Credentials::new(PAPI, SAPI, "wrong-srsa", Some(server.uri())).unwrap();
    let http = Arc::new(SignedClient::new(&creds));
    let keys = KeyManager::new(http, creds, KeyCachingConfig::default());

    let err = keys
        .get_encryption_key(&Dataset::unstructured(""), false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ClientError::Crypto(ubiq_crypto::CryptoError::Unwrap(_))
    ));
}

#[tokio::test]
async fn def_keys_primes_datasets_and_keys() {
    let server = MockServer::start().await;
    mount_def_keys(&server, ssn_dataset_json(), &[0, 1]).await;

    let creds = credentials(&server);
    let http = Arc::new(SignedClient::new(&creds));
    let keys = KeyManager::new(http.clone(), creds.clone(), KeyCachingConfig::default());
    let datasets = DatasetManager::new(http, creds, true);

    let all = keys
        .get_all_encryption_keys(&datasets, &["SSN".to_string()])
        .await
        .unwrap();
    let ssn_keys = &all["SSN"];
    assert_eq!(ssn_keys.len(), 2);
    assert_eq!(ssn_keys[0].key_number, Some(0));
    assert_eq!(ssn_keys[1].key_number, Some(1));
    assert_eq!(ssn_keys[0].raw, data_key(0));
    assert_eq!(ssn_keys[1].raw, data_key(1));

    // the dataset definition came along as a byproduct: no /ffs mock is
    // mounted, so a fetch would 404
    let dataset = datasets.get("SSN").await.unwrap();
    assert_eq!(dataset.kind, ubiq_client::DatasetKind::Structured);
}
