//! Supported algorithm registry.
//!
//! Maps the numeric ids carried in ciphertext headers and the names the KMS
//! uses in key responses to key/IV/tag geometry.

use crate::error::{ClientError, ClientResult};

/// A supported encryption algorithm.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Algorithm {
    Aes256Gcm,
    Aes128Gcm,
    Ff1,
}

impl Algorithm {
    /// Numeric id embedded in the unstructured ciphertext header.
    pub fn id(self) -> u8 {
        match self {
            Self::Aes256Gcm => 0,
            Self::Aes128Gcm => 1,
            Self::Ff1 => 2,
        }
    }

    /// Name the KMS uses in `security_model.algorithm`.
    pub fn name(self) -> &'static str {
        match self {
            Self::Aes256Gcm => "aes-256-gcm",
            Self::Aes128Gcm => "aes-128-gcm",
            Self::Ff1 => "ff1",
        }
    }

    pub fn key_len(self) -> usize {
        match self {
            Self::Aes256Gcm => 32,
            Self::Aes128Gcm => 16,
            Self::Ff1 => 0,
        }
    }

    pub fn iv_len(self) -> usize {
        match self {
            Self::Aes256Gcm | Self::Aes128Gcm => 12,
            Self::Ff1 => 0,
        }
    }

    pub fn tag_len(self) -> usize {
        match self {
            Self::Aes256Gcm | Self::Aes128Gcm => 16,
            Self::Ff1 => 0,
        }
    }

    pub fn from_id(id: u8) -> ClientResult<Self> {
        match id {
            0 => Ok(Self::Aes256Gcm),
            1 => Ok(Self::Aes128Gcm),
            2 => Ok(Self::Ff1),
            other => Err(ClientError::InputInvalid(format!(
                "unknown algorithm id {other}"
            ))),
        }
    }

    /// Case-insensitive lookup by KMS name.
    pub fn from_name(name: &str) -> ClientResult<Self> {
        match name.to_ascii_lowercase().as_str() {
            "aes-256-gcm" => Ok(Self::Aes256Gcm),
            "aes-128-gcm" => Ok(Self::Aes128Gcm),
            "ff1" => Ok(Self::Ff1),
            other => Err(ClientError::InputInvalid(format!(
                "unknown algorithm {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_roundtrip() {
        for algo in [Algorithm::Aes256Gcm, Algorithm::Aes128Gcm, Algorithm::Ff1] {
            assert_eq!(Algorithm::from_id(algo.id()).unwrap(), algo);
        }
        assert!(Algorithm::from_id(9).is_err());
    }

    #[test]
    fn name_lookup_case_insensitive() {
        assert_eq!(
            Algorithm::from_name("AES-256-GCM").unwrap(),
            Algorithm::Aes256Gcm
        );
        assert_eq!(
            Algorithm::from_name("Aes-128-Gcm").unwrap(),
            Algorithm::Aes128Gcm
        );
        assert!(Algorithm::from_name("des").is_err());
    }

    #[test]
    fn gcm_geometry() {
        assert_eq!(Algorithm::Aes256Gcm.key_len(), 32);
        assert_eq!(Algorithm::Aes128Gcm.key_len(), 16);
        for algo in [Algorithm::Aes256Gcm, Algorithm::Aes128Gcm] {
            assert_eq!(algo.iv_len(), 12);
            assert_eq!(algo.tag_len(), 16);
        }
    }
}
