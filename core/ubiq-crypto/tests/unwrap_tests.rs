//! Wrapped data-key recovery tests.
//!
//! Builds the same artifacts the KMS issues: an RSA private key as an
//! encrypted PKCS#8 PEM and a data key OAEP-wrapped under the public half.

use pkcs8::{EncodePrivateKey, LineEnding};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use std::sync::OnceLock;
use ubiq_crypto::unwrap::{decrypt_private_key, unwrap_data_key, unwrap_with_passphrase};
use ubiq_crypto::CryptoError;

const SRSA: &str = "test-srsa-passphrase";

fn keypair() -> &'static (RsaPrivateKey, RsaPublicKey) {
    static KEYS: OnceLock<(RsaPrivateKey, RsaPublicKey)> = OnceLock::new();
    KEYS.get_or_init(|| {
        let private = RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap();
        let public = RsaPublicKey::from(&private);
        (private, public)
    })
}

fn encrypted_pem() -> String {
    let (private, _) = keypair();
    private
        .to_pkcs8_encrypted_pem(&mut rand::rngs::OsRng, SRSA, LineEnding::LF)
        .unwrap()
        .to_string()
}

fn wrap(data_key: &[u8]) -> Vec<u8> {
    let (_, public) = keypair();
    public
        .encrypt(&mut rand::rngs::OsRng, Oaep::new::<sha1::Sha1>(), data_key)
        .unwrap()
}

#[test]
fn full_unwrap_roundtrip() {
    let data_key: Vec<u8> = (0u8..32).collect();
    let wrapped = wrap(&data_key);

    let raw = unwrap_with_passphrase(&encrypted_pem(), SRSA, &wrapped).unwrap();
    assert_eq!(raw.as_slice(), data_key.as_slice());
}

#[test]
fn two_step_unwrap_matches() {
    let data_key = vec![0x5A; 16];
    let wrapped = wrap(&data_key);

    let private = decrypt_private_key(&encrypted_pem(), SRSA).unwrap();
    let raw = unwrap_data_key(&private, &wrapped).unwrap();
    assert_eq!(raw.as_slice(), data_key.as_slice());
}

#[test]
fn wrong_passphrase_fails() {
    let err = decrypt_private_key(&encrypted_pem(), "not-the-passphrase").unwrap_err();
    assert!(matches!(err, CryptoError::Unwrap(_)));
}

#[test]
fn garbage_pem_fails() {
    let err = decrypt_private_key("-----BEGIN GARBAGE-----\nAAAA\n-----END GARBAGE-----\n", SRSA)
        .unwrap_err();
    assert!(matches!(err, CryptoError::Unwrap(_)));
}

#[test]
fn corrupted_wrapped_key_fails() {
    let mut wrapped = wrap(&[1u8; 32]);
    let last = wrapped.len() - 1;
    wrapped[last] ^= 0xFF;

    let err = unwrap_with_passphrase(&encrypted_pem(), SRSA, &wrapped).unwrap_err();
    assert!(matches!(err, CryptoError::Unwrap(_)));
}
