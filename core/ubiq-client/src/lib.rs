//! Client library for the Ubiq key-management platform.
//!
//! Two protection modes against KMS-issued data keys:
//! - **Unstructured**: AES-GCM sealing of arbitrary bytes, each ciphertext
//!   carrying a self-describing header that lets the key be recovered on
//!   decrypt.
//! - **Structured**: deterministic, format-preserving FF1 encryption of
//!   strings, parameterized per named dataset (alphabets, tweak, length
//!   bounds, passthrough rules, key-number embedding).
//!
//! Every KMS request is HMAC-signed; data keys arrive wrapped and are
//! unwrapped client-side with the caller's secret crypto access key. Usage
//! is aggregated and reported in batches.

pub mod algorithm;
pub mod cache;
pub mod client;
pub mod config;
pub mod credentials;
pub mod datasets;
pub mod error;
pub mod events;
pub mod http;
pub mod keys;
pub mod structured;
pub mod unstructured;

pub use client::UbiqClient;
pub use config::Configuration;
pub use credentials::Credentials;
pub use datasets::{Dataset, DatasetConfig, DatasetKind};
pub use error::{ClientError, ClientResult};
