//! API credentials.
//!
//! Three secrets identify and authorize a caller: the public API key id
//! (`papi`, the HMAC key id), the secret signing key (`sapi`, the HMAC
//! secret), and the secret crypto access key (`srsa`, the passphrase that
//! unwraps KMS-issued data keys). The credentials-file parser lives outside
//! this crate; here credentials come from explicit values or the process
//! environment.

use crate::error::{ClientError, ClientResult};

pub const DEFAULT_HOST: &str = "https://api.ubiqsecurity.com";

const ENV_PAPI: &str = "UBIQ_ACCESS_KEY_ID";
const ENV_SAPI: &str = "UBIQ_SECRET_SIGNING_KEY";
const ENV_SRSA: &str = "UBIQ_SECRET_CRYPTO_ACCESS_KEY";
const ENV_HOST: &str = "UBIQ_SERVER";

/// Immutable caller identity, created once at library entry.
#[derive(Clone)]
pub struct Credentials {
    papi: String,
    sapi: String,
    srsa: String,
    host: String,
}

impl Credentials {
    /// Builds credentials from explicit values. A missing host falls back
    /// to the public API endpoint; a bare hostname gets `https://`
    /// prepended; explicit `http://` hosts pass through untouched.
    pub fn new(
        papi: impl Into<String>,
        sapi: impl Into<String>,
        srsa: impl Into<String>,
        host: Option<String>,
    ) -> ClientResult<Self> {
        let creds = Self {
            papi: papi.into(),
            sapi: sapi.into(),
            srsa: srsa.into(),
            host: normalize_host(host),
        };
        creds.check_viable()?;
        Ok(creds)
    }

    /// Reads credentials from `UBIQ_ACCESS_KEY_ID`,
    /// `UBIQ_SECRET_SIGNING_KEY`, `UBIQ_SECRET_CRYPTO_ACCESS_KEY` and
    /// optionally `UBIQ_SERVER`.
    pub fn from_env() -> ClientResult<Self> {
        let var = |name: &str| {
            std::env::var(name)
                .map_err(|_| ClientError::Credentials(format!("{name} is not set")))
        };
        Self::new(
            var(ENV_PAPI)?,
            var(ENV_SAPI)?,
            var(ENV_SRSA)?,
            std::env::var(ENV_HOST).ok(),
        )
    }

    fn check_viable(&self) -> ClientResult<()> {
        if self.papi.is_empty() || self.sapi.is_empty() || self.srsa.is_empty() {
            return Err(ClientError::Credentials(
                "access key id, signing key and crypto access key are all required".to_string(),
            ));
        }
        Ok(())
    }

    /// Public API key id; doubles as the HMAC key id in request signatures.
    pub fn papi(&self) -> &str {
        &self.papi
    }

    /// Secret HMAC signing key.
    pub fn sapi(&self) -> &str {
        &self.sapi
    }

    /// Secret crypto access key (data-key unwrap passphrase).
    pub fn srsa(&self) -> &str {
        &self.srsa
    }

    /// Normalized base URL of the KMS.
    pub fn host(&self) -> &str {
        &self.host
    }
}

impl std::fmt::Debug for Credentials {
    // secrets stay out of logs
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("papi", &self.papi)
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

fn normalize_host(host: Option<String>) -> String {
    match host.filter(|h| !h.is_empty()) {
        None => DEFAULT_HOST.to_string(),
        Some(h) if h.starts_with("http://") || h.starts_with("https://") => h,
        Some(h) => format!("https://{h}"),
    }
}
