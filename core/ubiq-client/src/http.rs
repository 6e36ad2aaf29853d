//! Signed HTTP client for the KMS.
//!
//! Every request carries an HTTP-signature in the draft-cavage style:
//! synthetic `(created)` and `(request-target)` fields plus the
//! content-length, content-type, date, digest and host headers are joined
//! into a signing string, HMAC-SHA512'd under the secret signing key, and
//! emitted as a `Signature` header keyed by the public API id. The synthetic
//! fields are stripped before transmission.

use crate::credentials::Credentials;
use crate::error::{ClientError, ClientResult};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, Url};
use sha2::{Digest, Sha512};
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = concat!("ubiq-rust/", env!("CARGO_PKG_VERSION"));

/// Budget for fire-and-forget posts; past this the detached task gives up.
const ASYNC_POST_BUDGET: Duration = Duration::from_secs(10);

/// Response surface the rest of the client consumes.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: String,
    pub content: String,
    /// True for the two statuses the KMS uses for success (200, 201).
    pub success: bool,
}

impl HttpResponse {
    /// Deserializes the body, mapping malformed JSON to a serialization
    /// error.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> ClientResult<T> {
        Ok(serde_json::from_str(&self.content)?)
    }
}

/// HTTP client that signs every request with the caller's credentials.
#[derive(Clone)]
pub struct SignedClient {
    client: Client,
    papi: String,
    sapi: String,
}

impl SignedClient {
    pub fn new(creds: &Credentials) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            papi: creds.papi().to_string(),
            sapi: creds.sapi().to_string(),
        }
    }

    pub async fn get(&self, url: &str) -> ClientResult<HttpResponse> {
        self.execute(Method::GET, url, None).await
    }

    pub async fn post(&self, url: &str, body: String, ctype: &str) -> ClientResult<HttpResponse> {
        self.execute(Method::POST, url, Some((ctype.to_string(), body)))
            .await
    }

    pub async fn patch(&self, url: &str, body: String, ctype: &str) -> ClientResult<HttpResponse> {
        self.execute(Method::PATCH, url, Some((ctype.to_string(), body)))
            .await
    }

    /// Fire-and-forget POST: the request runs on a detached task with a
    /// bounded time budget; the response and any failure are discarded.
    pub fn post_async(&self, url: &str, body: String, ctype: &str) {
        self.send_async(Method::POST, url, body, ctype);
    }

    /// Fire-and-forget PATCH, used for the optional key-usage callback.
    pub fn patch_async(&self, url: &str, body: String, ctype: &str) {
        self.send_async(Method::PATCH, url, body, ctype);
    }

    fn send_async(&self, method: Method, url: &str, body: String, ctype: &str) {
        let this = self.clone();
        let url = url.to_string();
        let ctype = ctype.to_string();
        tokio::spawn(async move {
            let result = tokio::time::timeout(
                ASYNC_POST_BUDGET,
                this.execute(method.clone(), &url, Some((ctype, body))),
            )
            .await;
            if let Ok(Err(e)) = result {
                debug!("async {method} to {url} failed (ignored): {e}");
            }
        });
    }

    async fn execute(
        &self,
        method: Method,
        url: &str,
        body: Option<(String, String)>,
    ) -> ClientResult<HttpResponse> {
        let parsed = Url::parse(url)
            .map_err(|e| ClientError::InputInvalid(format!("invalid URL {url:?}: {e}")))?;

        let signed = self.sign(&method, &parsed, body.as_ref());

        let mut req = self.client.request(method, parsed);
        for (name, value) in &signed.headers {
            req = req.header(name.as_str(), value.as_str());
        }
        if let Some((_, payload)) = body {
            req = req.body(payload);
        }

        let resp = req.send().await?;
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let content = resp.text().await?;

        Ok(HttpResponse {
            status,
            content_type,
            content,
            success: matches!(status, 200 | 201),
        })
    }

    /// Computes the headers to transmit, including the `Signature` header
    /// covering the canonical field list.
    fn sign(&self, method: &Method, url: &Url, body: Option<&(String, String)>) -> SignedHeaders {
        let created = Utc::now().timestamp();
        let request_target = match url.query() {
            Some(q) => format!("{} {}?{q}", method.as_str().to_lowercase(), url.path()),
            None => format!("{} {}", method.as_str().to_lowercase(), url.path()),
        };
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let digest = format!(
            "SHA-512={}",
            B64.encode(Sha512::digest(
                body.map(|(_, b)| b.as_bytes()).unwrap_or_default()
            ))
        );
        let host = match url.port() {
            Some(port) => format!("{}:{port}", url.host_str().unwrap_or_default()),
            None => url.host_str().unwrap_or_default().to_string(),
        };

        // canonical list; absent pairs are omitted
        let mut canonical: Vec<(&str, String)> = vec![
            ("(created)", created.to_string()),
            ("(request-target)", request_target),
        ];
        if let Some((ctype, payload)) = body {
            canonical.push(("content-length", payload.len().to_string()));
            canonical.push(("content-type", ctype.clone()));
        }
        canonical.push(("date", date));
        canonical.push(("digest", digest));
        canonical.push(("host", host));

        let signing_string: String = canonical
            .iter()
            .map(|(name, value)| format!("{name}: {value}\n"))
            .collect();

        let mut mac = Hmac::<Sha512>::new_from_slice(self.sapi.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(signing_string.as_bytes());
        let signature = B64.encode(mac.finalize().into_bytes());

        let covered: Vec<&str> = canonical.iter().map(|(name, _)| *name).collect();
        let signature_header = format!(
            "keyId=\"{}\", algorithm=\"hmac-sha512\", created={created}, headers=\"{}\", signature=\"{signature}\"",
            self.papi,
            covered.join(" "),
        );

        // only the synthetic fields are stripped; every real header the
        // signature commits to is transmitted exactly as signed
        let headers = canonical
            .into_iter()
            .filter(|(name, _)| !name.starts_with('('))
            .map(|(name, value)| (name.to_string(), value))
            .chain(std::iter::once(("signature".to_string(), signature_header)))
            .collect();

        SignedHeaders { headers }
    }
}

struct SignedHeaders {
    headers: Vec<(String, String)>,
}
