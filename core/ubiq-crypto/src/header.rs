//! Unstructured ciphertext header codec.
//!
//! Every unstructured ciphertext starts with a self-describing header that
//! carries the algorithm, the IV, and the server-issued encrypted data key
//! needed to recover the decryption key later:
//!
//! ```text
//! u8 version | u8 flags | u8 algorithm | u8 iv_len | u16 edk_len (BE) | iv | edk
//! ```
//!
//! When the AAD flag is set, the encoded header bytes (through the encrypted
//! data key) are the associated data of the AEAD.

use crate::error::{CryptoError, CryptoResult};

/// Only header version in existence.
pub const VERSION_0: u8 = 0;

/// Flag bit 0: the header bytes are bound into the AEAD as associated data.
pub const FLAG_AAD: u8 = 0b0000_0001;

/// Fixed-width prefix before the variable IV and encrypted data key.
const FIXED_LEN: usize = 6;

/// Decoded (or to-be-encoded) unstructured ciphertext header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub flags: u8,
    pub algorithm: u8,
    pub iv: Vec<u8>,
    pub encrypted_data_key: Vec<u8>,
}

impl Header {
    pub fn new(algorithm: u8, flags: u8, iv: Vec<u8>, encrypted_data_key: Vec<u8>) -> Self {
        Self {
            version: VERSION_0,
            flags,
            algorithm,
            iv,
            encrypted_data_key,
        }
    }

    /// Total encoded length in bytes.
    pub fn encoded_len(&self) -> usize {
        FIXED_LEN + self.iv.len() + self.encrypted_data_key.len()
    }

    /// Whether the header bytes participate in the AEAD as associated data.
    pub fn uses_aad(&self) -> bool {
        self.flags & FLAG_AAD != 0
    }

    pub fn encode(&self) -> CryptoResult<Vec<u8>> {
        if self.version != VERSION_0 {
            return Err(CryptoError::BadHeader(format!(
                "unsupported version {}",
                self.version
            )));
        }
        if self.iv.len() > u8::MAX as usize {
            return Err(CryptoError::BadHeader(format!(
                "IV too long: {} bytes",
                self.iv.len()
            )));
        }
        if self.encrypted_data_key.len() > u16::MAX as usize {
            return Err(CryptoError::BadHeader(format!(
                "encrypted data key too long: {} bytes",
                self.encrypted_data_key.len()
            )));
        }

        let mut out = Vec::with_capacity(self.encoded_len());
        out.push(self.version);
        out.push(self.flags);
        out.push(self.algorithm);
        out.push(self.iv.len() as u8);
        out.extend_from_slice(&(self.encrypted_data_key.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.encrypted_data_key);
        Ok(out)
    }

    /// Parses a header from the front of `buf`. Trailing bytes (the AEAD
    /// ciphertext and tag) are ignored; use [`Header::encoded_len`] to find
    /// where they start.
    pub fn decode(buf: &[u8]) -> CryptoResult<Self> {
        if buf.len() < FIXED_LEN {
            return Err(CryptoError::BadHeader(format!(
                "truncated: {} bytes, need at least {FIXED_LEN}",
                buf.len()
            )));
        }

        let version = buf[0];
        if version != VERSION_0 {
            return Err(CryptoError::BadHeader(format!(
                "unsupported version {version}"
            )));
        }

        let flags = buf[1];
        let algorithm = buf[2];
        let iv_len = buf[3] as usize;
        let edk_len = u16::from_be_bytes([buf[4], buf[5]]) as usize;

        if buf.len() < FIXED_LEN + iv_len + edk_len {
            return Err(CryptoError::BadHeader(format!(
                "field widths exceed buffer: iv {iv_len} + edk {edk_len} in {} bytes",
                buf.len()
            )));
        }

        let iv = buf[FIXED_LEN..FIXED_LEN + iv_len].to_vec();
        let encrypted_data_key = buf[FIXED_LEN + iv_len..FIXED_LEN + iv_len + edk_len].to_vec();

        Ok(Self {
            version,
            flags,
            algorithm,
            iv,
            encrypted_data_key,
        })
    }
}
