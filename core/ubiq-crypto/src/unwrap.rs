//! Wrapped data-key recovery.
//!
//! The KMS never ships a data key in the clear. Every key response carries an
//! RSA private key as an encrypted PKCS#8 PEM (passphrase = the user's
//! `srsa` secret) and the data key RSA-OAEP-wrapped under the matching public
//! key. Recovering the raw key is a two-step unwrap: decrypt the PEM, then
//! OAEP-decrypt the wrapped bytes.
//!
//! Unwrapped key material is returned in a [`Zeroizing`] buffer so it is
//! scrubbed when dropped.

use crate::error::{CryptoError, CryptoResult};
use pkcs8::DecodePrivateKey;
use rsa::{Oaep, RsaPrivateKey};
use zeroize::Zeroizing;

/// Decrypts an `srsa`-protected PKCS#8 PEM into an RSA private key.
pub fn decrypt_private_key(pem: &str, srsa: &str) -> CryptoResult<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs8_encrypted_pem(pem, srsa.as_bytes())
        .map_err(|e| CryptoError::Unwrap(format!("private key decryption failed: {e}")))
}

/// RSA-OAEP(SHA-1) decrypts a wrapped data key.
pub fn unwrap_data_key(
    private_key: &RsaPrivateKey,
    wrapped: &[u8],
) -> CryptoResult<Zeroizing<Vec<u8>>> {
    private_key
        .decrypt(Oaep::new::<sha1::Sha1>(), wrapped)
        .map(Zeroizing::new)
        .map_err(|e| CryptoError::Unwrap(format!("RSA-OAEP unwrap failed: {e}")))
}

/// Full unwrap: decrypt the PEM with `srsa`, then OAEP-decrypt `wrapped`.
pub fn unwrap_with_passphrase(
    pem: &str,
    srsa: &str,
    wrapped: &[u8],
) -> CryptoResult<Zeroizing<Vec<u8>>> {
    let private_key = decrypt_private_key(pem, srsa)?;
    unwrap_data_key(&private_key, wrapped)
}
