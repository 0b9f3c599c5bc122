//! Remote metadata statement retrieval
//!
//! On a cache miss the statement URL from the TOC entry is downloaded, its
//! SHA-256 digest is compared with the TOC `hash`, and the document is
//! parsed. No retries are attempted here.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use sha2::{Digest, Sha256};

use super::types::{MetadataStatement, TocEntry};
use crate::client_data::decode_base64url;
use crate::error::{Fido2Error, Result};

/// Source of remote metadata documents
#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    /// Download the raw document at `url`.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// reqwest-backed fetcher passing the access token as a query parameter.
///
/// Relative entry URLs are resolved against the service endpoint.
#[cfg(feature = "network")]
pub struct HttpMetadataFetcher {
    client: reqwest::Client,
    endpoint: url::Url,
    access_token: String,
}

#[cfg(feature = "network")]
impl HttpMetadataFetcher {
    pub fn new(endpoint: &str, access_token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let endpoint = url::Url::parse(endpoint)
            .map_err(|e| Fido2Error::metadata_fetch(format!("invalid metadata endpoint: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Fido2Error::metadata_fetch(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint,
            access_token: access_token.into(),
        })
    }

    fn resolve(&self, url: &str) -> Result<url::Url> {
        self.endpoint
            .join(url)
            .map_err(|e| Fido2Error::metadata_fetch(format!("invalid metadata url {url}: {e}")))
    }
}

#[cfg(feature = "network")]
impl std::fmt::Debug for HttpMetadataFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpMetadataFetcher")
            .field("endpoint", &self.endpoint.as_str())
            .field("access_token", &"<redacted>")
            .finish()
    }
}

#[cfg(feature = "network")]
#[async_trait]
impl MetadataFetcher for HttpMetadataFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let url = self.resolve(url)?;
        let response = self
            .client
            .get(url.clone())
            .query(&[("token", self.access_token.as_str())])
            .send()
            .await
            .map_err(|e| Fido2Error::metadata_fetch(format!("metadata request failed: {e}")))?;

        let status = response.status();
        tracing::debug!(status = %status, url = %url, "Received metadata response");
        if !status.is_success() {
            return Err(Fido2Error::metadata_fetch(format!(
                "metadata service returned status {status}"
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Fido2Error::metadata_fetch(format!("failed to read metadata body: {e}")))?;
        Ok(body.to_vec())
    }
}

/// Download, check and parse the statement for `entry` within `timeout`.
pub async fn fetch_statement(
    fetcher: &dyn MetadataFetcher,
    entry: &TocEntry,
    timeout: Duration,
) -> Result<MetadataStatement> {
    let url = entry
        .url
        .as_deref()
        .ok_or_else(|| Fido2Error::metadata_fetch("TOC entry has no metadata url"))?;
    let expected_hash = entry
        .hash
        .as_deref()
        .ok_or_else(|| Fido2Error::metadata_fetch("TOC entry has no metadata hash"))?;

    let body = tokio::time::timeout(timeout, fetcher.fetch(url))
        .await
        .map_err(|_| {
            Fido2Error::metadata_fetch(format!("metadata fetch timed out after {timeout:?}"))
        })??;

    verify_digest(&body, expected_hash)?;
    parse_statement(&body)
}

fn verify_digest(body: &[u8], expected_hash: &str) -> Result<()> {
    let digest = Sha256::digest(body);
    let expected = decode_base64url(expected_hash)
        .map_err(|_| Fido2Error::metadata_fetch("TOC metadata hash is not base64url"))?;
    if digest.as_slice() != expected.as_slice() {
        return Err(Fido2Error::metadata_fetch(format!(
            "metadata digest mismatch: expected {expected_hash}, got {}",
            URL_SAFE_NO_PAD.encode(digest)
        )));
    }
    Ok(())
}

/// Statements are served base64url-encoded; plain JSON is accepted too.
fn parse_statement(body: &[u8]) -> Result<MetadataStatement> {
    let text = std::str::from_utf8(body)
        .map_err(|_| Fido2Error::metadata_fetch("metadata document is not text"))?
        .trim();
    let json = match decode_base64url(text) {
        Ok(decoded) => decoded,
        Err(_) => text.as_bytes().to_vec(),
    };
    serde_json::from_slice(&json)
        .map_err(|e| Fido2Error::metadata_fetch(format!("unparsable metadata statement: {e}")))
}
