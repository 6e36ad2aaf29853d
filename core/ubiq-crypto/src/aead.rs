//! AES-GCM sealing for unstructured payloads.
//!
//! Thin dispatch over the `aes-gcm` crate: the key length selects the cipher
//! (16 bytes -> AES-128-GCM, 32 bytes -> AES-256-GCM). Ciphertext is returned
//! with the 16-byte tag appended, matching the wire layout
//! `header || ciphertext || tag`.

use crate::error::{CryptoError, CryptoResult};
use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm, KeyInit, Nonce};
use rand::RngCore;

/// GCM nonce width; both supported algorithms use 96-bit IVs.
pub const IV_LEN: usize = 12;

/// Generates a fresh random IV.
pub fn random_iv(len: usize) -> Vec<u8> {
    let mut iv = vec![0u8; len];
    rand::rngs::OsRng.fill_bytes(&mut iv);
    iv
}

/// Encrypts `plaintext` under `key`/`iv` binding `aad`, returning
/// `ciphertext || tag`.
pub fn encrypt(key: &[u8], iv: &[u8], aad: &[u8], plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    if iv.len() != IV_LEN {
        return Err(CryptoError::InvalidInput(format!(
            "IV must be {IV_LEN} bytes, got {}",
            iv.len()
        )));
    }
    let nonce = Nonce::from_slice(iv);
    let payload = Payload {
        msg: plaintext,
        aad,
    };

    let result = match key.len() {
        16 => Aes128Gcm::new_from_slice(key)
            .expect("length checked")
            .encrypt(nonce, payload),
        32 => Aes256Gcm::new_from_slice(key)
            .expect("length checked")
            .encrypt(nonce, payload),
        n => {
            return Err(CryptoError::InvalidKeyLength {
                expected: 32,
                actual: n,
            })
        }
    };

    result.map_err(|_| CryptoError::Encryption("AEAD seal failed".to_string()))
}

/// Decrypts `ciphertext || tag` under `key`/`iv`, verifying `aad`.
///
/// A tag mismatch (tampered data, wrong key, or wrong associated data)
/// surfaces as [`CryptoError::Decryption`].
pub fn decrypt(key: &[u8], iv: &[u8], aad: &[u8], ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
    if iv.len() != IV_LEN {
        return Err(CryptoError::InvalidInput(format!(
            "IV must be {IV_LEN} bytes, got {}",
            iv.len()
        )));
    }
    let nonce = Nonce::from_slice(iv);
    let payload = Payload {
        msg: ciphertext,
        aad,
    };

    let result = match key.len() {
        16 => Aes128Gcm::new_from_slice(key)
            .expect("length checked")
            .decrypt(nonce, payload),
        32 => Aes256Gcm::new_from_slice(key)
            .expect("length checked")
            .decrypt(nonce, payload),
        n => {
            return Err(CryptoError::InvalidKeyLength {
                expected: 32,
                actual: n,
            })
        }
    };

    result.map_err(|_| {
        CryptoError::Decryption("authentication failed (wrong key or tampered data)".to_string())
    })
}
